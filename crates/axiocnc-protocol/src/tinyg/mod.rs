//! TinyG/g2core firmware support: the JSON line protocol (`{"sr":{...}}`
//! status reports, `{"r":...,"f":[...]}` command footers, `{"qr":n}` queue
//! reports), covering the subset a gateway like this one drives a machine
//! through rather than the full JSON surface (settings groups, help text).

pub mod parser;

pub use parser::TinyGParser;
