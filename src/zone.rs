/* src/zone.rs */

use crate::error::ZoneError;
use crate::records::{Record, RecordValue, fqdn, is_domain_name};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::io::Write;

const WEEK: u32 = 7 * 24 * 60 * 60;

pub const MAX_REFRESH: u32 = WEEK;
pub const MAX_RETRY: u32 = WEEK;
pub const MAX_EXPIRE: u32 = 90 * 24 * 60 * 60;
pub const MAX_TTL: u32 = WEEK;

/// TXT values longer than this are split over several quoted strings.
const TXT_SINGLE_LINE_MAX: usize = 250;
const TXT_CHUNK: usize = 100;

/// A zone as held by the store. The SOA record is derived from these fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_serial")]
    pub serial: u32,
    pub admin: String,
    #[serde(default = "default_refresh")]
    pub refresh: u32,
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default = "default_expire")]
    pub expire: u32,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub nameserver_group: Option<String>,
}

fn default_serial() -> u32 {
    1
}

fn default_refresh() -> u32 {
    21600
}

fn default_retry() -> u32 {
    3600
}

fn default_expire() -> u32 {
    604800
}

fn default_ttl() -> u32 {
    86400
}

fn default_active() -> bool {
    true
}

impl Zone {
    pub fn check_timers(&self) -> Result<(), ZoneError> {
        let timers = [
            ("refresh", self.refresh, MAX_REFRESH),
            ("retry", self.retry, MAX_RETRY),
            ("expire", self.expire, MAX_EXPIRE),
            ("ttl", self.ttl, MAX_TTL),
        ];
        for (field, value, max) in timers {
            if value > max {
                return Err(ZoneError::TimerOutOfRange {
                    zone: self.name.clone(),
                    field,
                    value,
                    max,
                });
            }
        }
        Ok(())
    }

    /// SOA snapshot for one generation pass.
    pub fn soa(&self, nameserver: &str) -> SoaRecord {
        SoaRecord {
            nameserver: nameserver.to_string(),
            admin: self.admin.clone(),
            serial: self.serial,
            refresh: self.refresh,
            retry: self.retry,
            expire: self.expire,
            ttl: self.ttl,
        }
    }

    /// Next serial in `YYYYMMDDnn` form. Falls back to a plain increment once
    /// the serial is already at or past today's base.
    pub fn next_serial(current: u32, today: NaiveDate) -> u32 {
        let date_serial = u64::from(today.year_ce().1) * 1_000_000
            + u64::from(today.month()) * 10_000
            + u64::from(today.day()) * 100;
        match u32::try_from(date_serial) {
            Ok(date_serial) if date_serial > current => date_serial,
            _ => current.wrapping_add(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoaRecord {
    pub nameserver: String,
    pub admin: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub ttl: u32,
}

/// Writes one zone in RFC 1035 master-file syntax. Records are emitted in the
/// order given. Any invalid value aborts the write; whatever was already
/// written to `w` is left for the caller to discard.
pub fn write_zone<W: Write>(
    w: &mut W,
    origin: &str,
    default_ttl: u32,
    soa: &SoaRecord,
    records: &[Record],
) -> Result<(), ZoneError> {
    if !is_domain_name(origin) {
        return Err(ZoneError::InvalidOrigin(origin.to_string()));
    }
    if !is_domain_name(&soa.nameserver) {
        return Err(ZoneError::InvalidSoa {
            field: "nameserver",
            value: soa.nameserver.clone(),
        });
    }
    if !is_domain_name(&soa.admin) {
        return Err(ZoneError::InvalidSoa {
            field: "admin",
            value: soa.admin.clone(),
        });
    }

    writeln!(w, "$ORIGIN {}", fqdn(origin))?;
    writeln!(w, "$TTL {}", default_ttl)?;

    writeln!(
        w,
        "@\tIN\tSOA\t{}\t{} (",
        fqdn(&soa.nameserver),
        fqdn(&soa.admin)
    )?;
    writeln!(w, "\t\t\t{} ; Serial", soa.serial)?;
    writeln!(w, "\t\t\t{} ; Refresh", soa.refresh)?;
    writeln!(w, "\t\t\t{} ; Retry", soa.retry)?;
    writeln!(w, "\t\t\t{} ; Expire", soa.expire)?;
    writeln!(w, "\t\t\t{} ) ; Minimum TTL", soa.ttl)?;

    for record in records {
        let owner = record.owner();
        if !matches!(owner, "@" | "*") && !is_domain_name(owner) {
            return Err(ZoneError::InvalidOwner(record.name.clone()));
        }
        let value = record.record_type.parse_value(&record.value)?;
        let rdata = format_rdata(&value);
        match record.ttl {
            Some(ttl) => writeln!(
                w,
                "{}\t{}\tIN\t{}\t{}",
                owner,
                ttl,
                record.record_type,
                rdata
            )?,
            None => writeln!(
                w,
                "{}\tIN\t{}\t{}",
                owner,
                record.record_type,
                rdata
            )?,
        }
    }

    Ok(())
}

/// Master-file presentation of a validated value.
fn format_rdata(value: &RecordValue) -> String {
    match value {
        RecordValue::Ns { target }
        | RecordValue::Cname { target }
        | RecordValue::Ptr { target } => fqdn(target),
        RecordValue::Mx { preference, target } => format!("{}\t{}", preference, fqdn(target)),
        RecordValue::A { ip } => ip.to_string(),
        RecordValue::Aaaa { ip } => ip.to_string(),
        RecordValue::Txt { text } => format_txt(text.as_bytes()),
        RecordValue::Srv {
            priority,
            weight,
            port,
            target,
        } => format!("{}\t{}\t{}\t{}", priority, weight, port, fqdn(target)),
        RecordValue::Caa { flags, tag, value } => {
            format!("{}\t{}\t{}", flags, tag, format_caa_value(value))
        }
    }
}

/// Plain issuer names are written as names; anything else, such as issuer
/// parameters after `;`, must be a quoted string.
fn format_caa_value(value: &str) -> String {
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.'))
    {
        fqdn(value)
    } else {
        quote(value.as_bytes())
    }
}

fn format_txt(text: &[u8]) -> String {
    if text.len() <= TXT_SINGLE_LINE_MAX {
        return quote(text);
    }
    let mut out = String::from("(\n");
    for chunk in text.chunks(TXT_CHUNK) {
        out.push('\t');
        out.push_str(&quote(chunk));
        out.push('\n');
    }
    out.push(')');
    out
}

/// Quotes a character-string, escaping per RFC 1035 §5.1.
fn quote(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' | b'\\' => {
                out.push('\\');
                out.push(char::from(b));
            }
            0x20..=0x7e => out.push(char::from(b)),
            _ => out.push_str(&format!("\\{:03}", b)),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordError;
    use crate::records::RecordType;

    fn example_soa() -> SoaRecord {
        SoaRecord {
            nameserver: "dns1.example.com".to_string(),
            admin: "hostmaster.example.com".to_string(),
            serial: 2001062501,
            refresh: 21600,
            retry: 3600,
            expire: 604800,
            ttl: 86400,
        }
    }

    fn render(records: &[Record]) -> Result<String, ZoneError> {
        let mut buf = Vec::new();
        write_zone(&mut buf, "example.com", 86400, &example_soa(), records)?;
        Ok(String::from_utf8(buf).unwrap())
    }

    const HEADER: &str = "$ORIGIN example.com.\n\
        $TTL 86400\n\
        @\tIN\tSOA\tdns1.example.com.\thostmaster.example.com. (\n\
        \t\t\t2001062501 ; Serial\n\
        \t\t\t21600 ; Refresh\n\
        \t\t\t3600 ; Retry\n\
        \t\t\t604800 ; Expire\n\
        \t\t\t86400 ) ; Minimum TTL\n";

    #[test]
    fn writes_example_zone() {
        let out = render(&[
            Record::new("@", RecordType::Ns, "dns1.example.com"),
            Record::new("@", RecordType::Mx, "10 mail.example.com"),
            Record::new("www", RecordType::Cname, "server1.example.com"),
        ])
        .unwrap();
        let expected = format!(
            "{}@\tIN\tNS\tdns1.example.com.\n\
             @\tIN\tMX\t10\tmail.example.com.\n\
             www\tIN\tCNAME\tserver1.example.com.\n",
            HEADER
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn formats_each_type() {
        let out = render(&[
            Record::new("", RecordType::A, "10.0.1.4"),
            Record::new("dns1", RecordType::Aaaa, "2001:db8::1:1"),
            Record::new("sixinfour", RecordType::Aaaa, "64:ff9b::10.0.6.4"),
            Record::new("_sip._tcp", RecordType::Srv, "10\t60\t5060\tsip.example.com"),
            Record::new("@", RecordType::Caa, "0\tissue\tletsencrypt.org"),
            Record::new("4", RecordType::Ptr, "host.example.com."),
            Record::new("*", RecordType::Txt, "v=spf1 include:_spf.example.com -all"),
        ])
        .unwrap();
        let body: Vec<&str> = out.lines().skip(8).collect();
        assert_eq!(
            body,
            [
                "@\tIN\tA\t10.0.1.4",
                "dns1\tIN\tAAAA\t2001:db8::1:1",
                "sixinfour\tIN\tAAAA\t64:ff9b::a00:604",
                "_sip._tcp\tIN\tSRV\t10\t60\t5060\tsip.example.com.",
                "@\tIN\tCAA\t0\tissue\tletsencrypt.org.",
                "4\tIN\tPTR\thost.example.com.",
                "*\tIN\tTXT\t\"v=spf1 include:_spf.example.com -all\"",
            ]
        );
    }

    #[test]
    fn ttl_override_is_written() {
        let out = render(&[Record::new("www", RecordType::A, "10.0.0.1").with_ttl(Some(300))]).unwrap();
        assert!(out.ends_with("www\t300\tIN\tA\t10.0.0.1\n"));
    }

    #[test]
    fn txt_up_to_250_bytes_stays_on_one_line() {
        let text = "a".repeat(250);
        let out = render(&[Record::new("", RecordType::Txt, text.clone())]).unwrap();
        assert!(out.ends_with(&format!("@\tIN\tTXT\t\"{}\"\n", text)));
    }

    #[test]
    fn long_txt_is_split_into_chunks() {
        let text = format!("{}{}{}", "a".repeat(100), "b".repeat(100), "c".repeat(100));
        let out = render(&[Record::new("mail._domainkey", RecordType::Txt, text)]).unwrap();
        let expected = format!(
            "mail._domainkey\tIN\tTXT\t(\n\t\"{}\"\n\t\"{}\"\n\t\"{}\"\n)\n",
            "a".repeat(100),
            "b".repeat(100),
            "c".repeat(100)
        );
        assert!(out.ends_with(&expected), "{}", out);
    }

    #[test]
    fn txt_escapes_quotes_and_control_bytes() {
        let out = render(&[Record::new("", RecordType::Txt, "say \"hi\"\\\t")]).unwrap();
        assert!(out.ends_with("@\tIN\tTXT\t\"say \\\"hi\\\"\\\\\\009\"\n"), "{}", out);
    }

    #[test]
    fn caa_with_parameters_is_quoted() {
        let out = render(&[Record::new(
            "@",
            RecordType::Caa,
            "0\tissue\tca.example.net; account=230123",
        )])
        .unwrap();
        assert!(
            out.ends_with("@\tIN\tCAA\t0\tissue\t\"ca.example.net; account=230123\"\n"),
            "{}",
            out
        );
    }

    #[test]
    fn owner_names_cannot_inject_lines() {
        for name in ["www\n@\tIN\tA\t10.9.9.9", "has space", "a..b"] {
            let err = render(&[Record::new(name, RecordType::A, "10.0.0.1")]).unwrap_err();
            assert!(matches!(err, ZoneError::InvalidOwner(ref owner) if owner == name));
        }
        let out = render(&[
            Record::new("*", RecordType::A, "10.0.0.1"),
            Record::new("_sip._tcp", RecordType::Srv, "1\t0\t5060\tsip.example.com"),
            Record::new("host.example.com.", RecordType::A, "10.0.0.2"),
        ])
        .unwrap();
        assert!(out.contains("*\tIN\tA\t10.0.0.1\n"));
        assert!(out.ends_with("host.example.com.\tIN\tA\t10.0.0.2\n"));
    }

    #[test]
    fn invalid_origin_is_rejected() {
        let mut buf = Vec::new();
        let err = write_zone(&mut buf, "bad..origin", 3600, &example_soa(), &[]).unwrap_err();
        assert!(matches!(err, ZoneError::InvalidOrigin(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn invalid_record_aborts_the_write() {
        let err = render(&[
            Record::new("www", RecordType::A, "10.0.0.1"),
            Record::new("mail", RecordType::Mx, "mail.example.com"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ZoneError::Record(RecordError::InvalidValue { record_type: "MX", .. })
        ));
    }

    #[test]
    fn timers_are_bounded() {
        let mut zone = Zone {
            id: 1,
            name: "example.com".to_string(),
            serial: 1,
            admin: "hostmaster.example.com".to_string(),
            refresh: MAX_REFRESH,
            retry: MAX_RETRY,
            expire: MAX_EXPIRE,
            ttl: MAX_TTL,
            active: true,
            nameserver_group: None,
        };
        assert!(zone.check_timers().is_ok());
        zone.expire = MAX_EXPIRE + 1;
        assert!(matches!(
            zone.check_timers(),
            Err(ZoneError::TimerOutOfRange { field: "expire", .. })
        ));
    }

    #[test]
    fn serial_follows_the_date() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(Zone::next_serial(2001062501, day), 2026101900);
        assert_eq!(Zone::next_serial(2026101900, day), 2026101901);
        assert_eq!(Zone::next_serial(2026101999, day), 2026102000);
        assert_eq!(Zone::next_serial(u32::MAX, day), 0);
    }
}
