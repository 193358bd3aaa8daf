/* src/records.rs */

//! Record-type vocabulary and per-type value handling.
//!
//! Values are stored flattened: composite types keep their fields in one
//! string separated by tabs. MX and SRV accept any whitespace when parsing;
//! CAA splits on tabs only, since its value may contain spaces. The
//! structured [`RecordValue`] only exists at the API boundary and while a zone
//! is being serialized.

use crate::error::RecordError;
use hickory_proto::rr::Name;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

const MAX_LABEL_LENGTH: usize = 63;

/// Permissive master-file name check, used for zone origins and SOA names.
pub fn is_domain_name(name: &str) -> bool {
    if name == "." {
        return true;
    }
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_graphic()) {
        return false;
    }
    let labels: Vec<&str> = trimmed.split('.').collect();
    if labels
        .iter()
        .any(|label| label.is_empty() || label.len() > MAX_LABEL_LENGTH)
    {
        return false;
    }
    // Enforces the 255 octet wire limit.
    Name::from_labels(labels.iter().map(|label| label.as_bytes())).is_ok()
}

/// Strict hostname check used for record targets: lowercase letters, digits,
/// hyphens and dots, plus `/` for RFC 2317 classless names.
pub fn validate_domain_name(name: &str) -> bool {
    is_domain_name(name)
        && name.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '/')
        })
}

/// Appends the root label when missing.
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    Ns,
    Mx,
    A,
    Aaaa,
    Cname,
    Txt,
    Srv,
    Caa,
    Ptr,
}

impl RecordType {
    pub const ALL: [RecordType; 9] = [
        RecordType::Ns,
        RecordType::Mx,
        RecordType::A,
        RecordType::Aaaa,
        RecordType::Cname,
        RecordType::Txt,
        RecordType::Srv,
        RecordType::Caa,
        RecordType::Ptr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Ns => "NS",
            RecordType::Mx => "MX",
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Txt => "TXT",
            RecordType::Srv => "SRV",
            RecordType::Caa => "CAA",
            RecordType::Ptr => "PTR",
        }
    }

    /// Parses a stored value string into its structured form.
    pub fn parse_value(self, raw: &str) -> Result<RecordValue, RecordError> {
        let tag = self.as_str();
        match self {
            RecordType::Ns => Ok(RecordValue::Ns {
                target: parse_target(tag, raw, raw)?,
            }),
            RecordType::Cname => Ok(RecordValue::Cname {
                target: parse_target(tag, raw, raw)?,
            }),
            RecordType::Ptr => Ok(RecordValue::Ptr {
                target: parse_target(tag, raw, raw)?,
            }),
            RecordType::Mx => {
                let [preference, target] = fields::<2>(raw)
                    .ok_or_else(|| RecordError::invalid(tag, raw, "expected preference and target"))?;
                let preference: u32 = parse_number(tag, raw, "preference", preference)?;
                if preference == 0 {
                    return Err(RecordError::invalid(tag, raw, "preference must be greater than zero"));
                }
                Ok(RecordValue::Mx {
                    preference,
                    target: parse_target(tag, raw, target)?,
                })
            }
            RecordType::A => raw
                .parse::<Ipv4Addr>()
                .map(|ip| RecordValue::A { ip })
                .map_err(|_| RecordError::invalid(tag, raw, "not an IPv4 address")),
            RecordType::Aaaa => raw
                .parse::<Ipv6Addr>()
                .map(|ip| RecordValue::Aaaa { ip })
                .map_err(|_| RecordError::invalid(tag, raw, "not an IPv6 address")),
            RecordType::Txt => Ok(RecordValue::Txt {
                text: raw.to_string(),
            }),
            RecordType::Srv => {
                let [priority, weight, port, target] = fields::<4>(raw).ok_or_else(|| {
                    RecordError::invalid(tag, raw, "expected priority, weight, port and target")
                })?;
                let priority: u32 = parse_number(tag, raw, "priority", priority)?;
                let weight: u32 = parse_number(tag, raw, "weight", weight)?;
                let port: u16 = parse_number(tag, raw, "port", port)?;
                if priority == 0 {
                    return Err(RecordError::invalid(tag, raw, "priority must be greater than zero"));
                }
                if port == 0 {
                    return Err(RecordError::invalid(tag, raw, "port must be greater than zero"));
                }
                Ok(RecordValue::Srv {
                    priority,
                    weight,
                    port,
                    target: parse_target(tag, raw, target)?,
                })
            }
            RecordType::Caa => {
                let mut parts = raw.splitn(3, '\t');
                let (Some(flags), Some(caa_tag), Some(value)) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(RecordError::invalid(tag, raw, "expected tab-separated flags, tag and value"));
                };
                if value.is_empty() || value.contains('\t') {
                    return Err(RecordError::invalid(tag, raw, "value must be non-empty and contain no tab"));
                }
                let flags: u8 = parse_number(tag, raw, "flags", flags)?;
                let caa_tag = caa_tag
                    .parse::<CaaTag>()
                    .map_err(|_| RecordError::invalid(tag, raw, "tag must be issue or issuewild"))?;
                Ok(RecordValue::Caa {
                    flags,
                    tag: caa_tag,
                    value: value.to_string(),
                })
            }
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| RecordError::UnknownType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaaTag {
    Issue,
    IssueWild,
}

impl CaaTag {
    pub fn as_str(self) -> &'static str {
        match self {
            CaaTag::Issue => "issue",
            CaaTag::IssueWild => "issuewild",
        }
    }
}

impl FromStr for CaaTag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue" => Ok(CaaTag::Issue),
            "issuewild" => Ok(CaaTag::IssueWild),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CaaTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured record value, one variant per record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum RecordValue {
    Ns {
        target: String,
    },
    Mx {
        preference: u32,
        target: String,
    },
    A {
        ip: Ipv4Addr,
    },
    Aaaa {
        ip: Ipv6Addr,
    },
    Cname {
        target: String,
    },
    Txt {
        text: String,
    },
    Srv {
        priority: u32,
        weight: u32,
        port: u16,
        target: String,
    },
    Caa {
        flags: u8,
        tag: CaaTag,
        value: String,
    },
    Ptr {
        target: String,
    },
}

impl RecordValue {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordValue::Ns { .. } => RecordType::Ns,
            RecordValue::Mx { .. } => RecordType::Mx,
            RecordValue::A { .. } => RecordType::A,
            RecordValue::Aaaa { .. } => RecordType::Aaaa,
            RecordValue::Cname { .. } => RecordType::Cname,
            RecordValue::Txt { .. } => RecordType::Txt,
            RecordValue::Srv { .. } => RecordType::Srv,
            RecordValue::Caa { .. } => RecordType::Caa,
            RecordValue::Ptr { .. } => RecordType::Ptr,
        }
    }

    /// Checks a structured value (as received from an API client) against the
    /// same rules `RecordType::parse_value` applies to a stored string.
    pub fn is_valid(&self) -> bool {
        match self {
            RecordValue::Ns { target }
            | RecordValue::Cname { target }
            | RecordValue::Ptr { target } => validate_domain_name(target),
            RecordValue::Mx { preference, target } => {
                *preference > 0 && validate_domain_name(target)
            }
            RecordValue::A { .. } | RecordValue::Aaaa { .. } | RecordValue::Txt { .. } => true,
            RecordValue::Srv {
                priority,
                port,
                target,
                ..
            } => *priority > 0 && *port > 0 && validate_domain_name(target),
            // Tabs separate the flattened fields.
            RecordValue::Caa { value, .. } => !value.is_empty() && !value.contains('\t'),
        }
    }

    /// Flattens the value into its stored string form.
    pub fn to_raw(&self) -> String {
        match self {
            RecordValue::Ns { target }
            | RecordValue::Cname { target }
            | RecordValue::Ptr { target } => target.clone(),
            RecordValue::Mx { preference, target } => format!("{}\t{}", preference, target),
            RecordValue::A { ip } => ip.to_string(),
            RecordValue::Aaaa { ip } => ip.to_string(),
            RecordValue::Txt { text } => text.clone(),
            RecordValue::Srv {
                priority,
                weight,
                port,
                target,
            } => format!("{}\t{}\t{}\t{}", priority, weight, port, target),
            RecordValue::Caa { flags, tag, value } => format!("{}\t{}\t{}", flags, tag, value),
        }
    }
}

/// Returns true when `raw` is an acceptable value for the record type `tag`.
pub fn validate_value(tag: &str, raw: &str) -> bool {
    parse_value(tag, raw).is_ok()
}

pub fn parse_value(tag: &str, raw: &str) -> Result<RecordValue, RecordError> {
    tag.parse::<RecordType>()?.parse_value(raw)
}

pub fn format_value(value: &RecordValue) -> String {
    value.to_raw()
}

/// One resource record ready for serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    /// `None` means the zone default applies.
    pub ttl: Option<u32>,
    pub record_type: RecordType,
    pub value: String,
}

impl Record {
    pub fn new(name: impl Into<String>, record_type: RecordType, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl: None,
            record_type,
            value: value.into(),
        }
    }

    pub fn with_ttl(mut self, ttl: Option<u32>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Owner name as written in a zone file; blank means the apex.
    pub fn owner(&self) -> &str {
        let name = self.name.trim();
        if name.is_empty() { "@" } else { name }
    }
}

fn fields<const N: usize>(raw: &str) -> Option<[&str; N]> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    parts.try_into().ok()
}

fn parse_number<T: FromStr>(
    tag: &'static str,
    raw: &str,
    field: &str,
    value: &str,
) -> Result<T, RecordError> {
    value
        .parse::<T>()
        .map_err(|_| RecordError::invalid(tag, raw, format!("{} {:?} is out of range", field, value)))
}

fn parse_target(tag: &'static str, raw: &str, target: &str) -> Result<String, RecordError> {
    if validate_domain_name(target) {
        Ok(target.to_string())
    } else {
        Err(RecordError::invalid(
            tag,
            raw,
            format!("{:?} is not a valid domain name", target),
        ))
    }
}
