/* src/bind.rs */

use std::io::{self, Write};
use std::path::Path;

/// Writes one `zone` stanza per name, in the order given, for inclusion from
/// named's local config.
pub fn write_bind_config<W: Write>(w: &mut W, zones_dir: &Path, zones: &[String]) -> io::Result<()> {
    for zone in zones {
        let file = zones_dir.join(format!("{}.zone", zone));
        writeln!(w, "zone {} IN {{", quote(zone))?;
        writeln!(w, "\ttype master;")?;
        writeln!(w, "\tfile {};", quote(&file.to_string_lossy()))?;
        writeln!(w, "}};")?;
    }
    Ok(())
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
