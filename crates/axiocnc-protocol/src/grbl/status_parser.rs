//! Field-level extraction from a Grbl `<...>` status report line.

use axiocnc_core::data::PartialPosition;

fn parse_coords(s: &str) -> Option<PartialPosition> {
    let coords: Vec<f64> = s
        .split(',')
        .filter_map(|v| v.trim().parse::<f64>().ok())
        .collect();
    if coords.len() < 3 {
        return None;
    }
    Some(PartialPosition {
        x: coords.first().copied(),
        y: coords.get(1).copied(),
        z: coords.get(2).copied(),
        a: coords.get(3).copied(),
        b: coords.get(4).copied(),
        c: coords.get(5).copied(),
    })
}

/// Buffer state reported in older Grbl `Buf:plan,rx` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRxState {
    pub plan: u8,
    pub rx: u8,
}

impl BufferRxState {
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 {
            return None;
        }
        Some(Self {
            plan: parts[0].trim().parse().ok()?,
            rx: parts[1].trim().parse().ok()?,
        })
    }
}

pub struct StatusFields;

impl StatusFields {
    pub fn machine_state(status_line: &str) -> Option<&str> {
        let start = status_line.find('<')?;
        let end = status_line[start..].find('|')?;
        Some(&status_line[start + 1..start + end])
    }

    pub fn mpos(status_line: &str) -> Option<PartialPosition> {
        Self::extract_field(status_line, "MPos:").and_then(parse_coords)
    }

    pub fn wpos(status_line: &str) -> Option<PartialPosition> {
        Self::extract_field(status_line, "WPos:").and_then(parse_coords)
    }

    pub fn wco(status_line: &str) -> Option<PartialPosition> {
        Self::extract_field(status_line, "WCO:").and_then(parse_coords)
    }

    pub fn buffer(status_line: &str) -> Option<BufferRxState> {
        Self::extract_field(status_line, "Buf:").and_then(BufferRxState::parse)
    }

    pub fn feed_rate(status_line: &str) -> Option<f64> {
        Self::extract_field(status_line, "F:").and_then(|s| s.trim().parse().ok())
    }

    pub fn spindle_speed(status_line: &str) -> Option<f64> {
        Self::extract_field(status_line, "S:").and_then(|s| s.trim().parse().ok())
    }

    pub fn overrides(status_line: &str) -> Option<(u16, u8, u16)> {
        let raw = Self::extract_field(status_line, "Ov:")?;
        let parts: Vec<&str> = raw.split(',').collect();
        if parts.len() < 3 {
            return None;
        }
        Some((
            parts[0].trim().parse().ok()?,
            parts[1].trim().parse().ok()?,
            parts[2].trim().parse().ok()?,
        ))
    }

    pub fn pins(status_line: &str) -> Option<&str> {
        Self::extract_field(status_line, "Pn:")
    }

    fn extract_field<'a>(status_line: &'a str, prefix: &str) -> Option<&'a str> {
        let search = status_line
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(status_line);
        let start = search.find(prefix)? + prefix.len();
        let rest = &search[start..];
        let end = rest.find('|').unwrap_or(rest.len());
        Some(&rest[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_machine_state() {
        let line = "<Idle|MPos:0.000,0.000,0.000|FS:0,0>";
        assert_eq!(StatusFields::machine_state(line), Some("Idle"));
    }

    #[test]
    fn parses_mpos_with_missing_axes_as_none() {
        let line = "<Run|MPos:1.000,2.000,3.000|FS:500,0>";
        let mpos = StatusFields::mpos(line).unwrap();
        assert_eq!(mpos.x, Some(1.0));
        assert_eq!(mpos.a, None);
    }

    #[test]
    fn parses_buffer_state() {
        let line = "<Idle|MPos:0,0,0|Buf:10:64>";
        let buf = StatusFields::buffer(line).unwrap();
        assert_eq!(buf.plan, 10);
        assert_eq!(buf.rx, 64);
    }

    #[test]
    fn parses_overrides_triplet() {
        let line = "<Idle|MPos:0,0,0|Ov:110,100,95>";
        assert_eq!(StatusFields::overrides(line), Some((110, 100, 95)));
    }

    #[test]
    fn missing_field_returns_none() {
        let line = "<Idle|MPos:0,0,0>";
        assert_eq!(StatusFields::feed_rate(line), None);
    }
}
