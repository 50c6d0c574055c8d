//! Value Objects - Immutable domain primitives
//!
//! Port mappings and watch tags are identified by their value rather than
//! identity. They are immutable and can be freely shared.

use std::collections::HashSet;
use std::fmt;

/// A single forwarded port: traffic arriving on `host_port` is sent to
/// `container_port` on whichever backend is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

impl PortMapping {
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.host_port, self.container_port)
    }
}

/// Errors produced while parsing a port mapping specification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortSpecError {
    #[error("invalid port mapping {token:?}: {reason}")]
    Parse { token: String, reason: String },
    #[error("port ranges in {token:?} differ in size ({host} host ports, {container} container ports)")]
    RangeMismatch {
        token: String,
        host: usize,
        container: usize,
    },
    #[error("port range {range:?} ends before it starts")]
    InvalidRange { range: String },
    #[error("host port {0} is mapped more than once")]
    DuplicateHostPort(u16),
}

impl PortSpecError {
    fn parse(token: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            token: token.to_string(),
            reason: reason.into(),
        }
    }
}

/// Inclusive port range; a single port is a range of size one.
#[derive(Debug, Clone, Copy)]
struct PortRange {
    lo: u16,
    hi: u16,
    is_range: bool,
}

impl PortRange {
    fn len(&self) -> usize {
        (self.hi - self.lo) as usize + 1
    }
}

/// Parse a comma-separated port mapping specification.
///
/// Each token is `port`, `host=container`, or uses `lo-hi` ranges on either
/// side of the `=`. Mappings come back in input order, ranges
/// expanded in ascending order.
///
/// # Examples
/// ```
/// use hotswap_proxy::domain::value_objects::{parse_port_spec, PortMapping};
///
/// let mappings = parse_port_spec("8000-8001=80-81,9000").unwrap();
/// assert_eq!(
///     mappings,
///     vec![
///         PortMapping::new(8000, 80),
///         PortMapping::new(8001, 81),
///         PortMapping::new(9000, 9000),
///     ]
/// );
/// ```
pub fn parse_port_spec(spec: &str) -> Result<Vec<PortMapping>, PortSpecError> {
    if spec.trim().is_empty() {
        return Err(PortSpecError::parse(spec, "empty port specification"));
    }

    let mut mappings = Vec::new();
    let mut seen = HashSet::new();

    for token in spec.split(',') {
        for mapping in parse_token(token.trim())? {
            if !seen.insert(mapping.host_port) {
                return Err(PortSpecError::DuplicateHostPort(mapping.host_port));
            }
            mappings.push(mapping);
        }
    }

    Ok(mappings)
}

fn parse_token(token: &str) -> Result<Vec<PortMapping>, PortSpecError> {
    if token.is_empty() {
        return Err(PortSpecError::parse(token, "empty mapping"));
    }

    let (host_part, container_part) = match token.split_once('=') {
        Some((host, container)) => {
            if container.contains('=') {
                return Err(PortSpecError::parse(token, "expected host=container"));
            }
            (host, Some(container))
        }
        None => (token, None),
    };

    let host = parse_range(token, host_part)?;
    let container = match container_part {
        Some(part) => parse_range(token, part)?,
        None => host,
    };

    // A single container port under a host range is offset along with it.
    if container.is_range && container.len() != host.len() {
        return Err(PortSpecError::RangeMismatch {
            token: token.to_string(),
            host: host.len(),
            container: container.len(),
        });
    }

    let mut mappings = Vec::with_capacity(host.len());
    for offset in 0..host.len() {
        let host_port = host.lo as usize + offset;
        let container_port = container.lo as usize + offset;
        let container_port = u16::try_from(container_port)
            .map_err(|_| PortSpecError::parse(token, "container port exceeds 65535"))?;
        mappings.push(PortMapping::new(host_port as u16, container_port));
    }

    Ok(mappings)
}

fn parse_range(token: &str, part: &str) -> Result<PortRange, PortSpecError> {
    let part = part.trim();
    match part.split_once('-') {
        Some((lo, hi)) => {
            let lo = parse_port(token, lo)?;
            let hi = parse_port(token, hi)?;
            if hi < lo {
                return Err(PortSpecError::InvalidRange {
                    range: part.to_string(),
                });
            }
            Ok(PortRange {
                lo,
                hi,
                is_range: true,
            })
        }
        None => {
            let port = parse_port(token, part)?;
            Ok(PortRange {
                lo: port,
                hi: port,
                is_range: false,
            })
        }
    }
}

fn parse_port(token: &str, s: &str) -> Result<u16, PortSpecError> {
    let s = s.trim();
    match s.parse::<u16>() {
        Ok(0) => Err(PortSpecError::parse(token, "port 0 is not a valid port")),
        Ok(port) => Ok(port),
        Err(_) => Err(PortSpecError::parse(
            token,
            format!("{:?} is not a valid port number", s),
        )),
    }
}

/// The image tag whose containers are eligible backends.
///
/// A bare tag (`web`) matches any sub-tag of that image (`web`, `web:v2`).
/// A tag that names a sub-tag (`web:v2`) matches only that exact image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchTag(String);

impl WatchTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether an image reference belongs to this tag.
    pub fn matches(&self, image: &str) -> bool {
        if image == self.0 {
            return true;
        }
        strip_sub_tag(image) == self.0
    }
}

impl fmt::Display for WatchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Drop a trailing `:<sub-tag>`; a colon before the last `/` is a registry port.
fn strip_sub_tag(image: &str) -> &str {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => &image[..name_start + i],
        None => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== parse_port_spec Tests =====

    #[test]
    fn test_single_port_mirrors_container_port() {
        let mappings = parse_port_spec("8000").unwrap();
        assert_eq!(mappings, vec![PortMapping::new(8000, 8000)]);
    }

    #[test]
    fn test_host_container_pair() {
        let mappings = parse_port_spec("8000=80").unwrap();
        assert_eq!(mappings, vec![PortMapping::new(8000, 80)]);
    }

    #[test]
    fn test_comma_separated_pairs() {
        let mappings = parse_port_spec("8000=80,9000=90").unwrap();
        assert_eq!(
            mappings,
            vec![PortMapping::new(8000, 80), PortMapping::new(9000, 90)]
        );
    }

    #[test]
    fn test_comma_separated_single_ports() {
        let mappings = parse_port_spec("8000,9000").unwrap();
        assert_eq!(mappings.len(), 2);
        for m in &mappings {
            assert_eq!(m.host_port, m.container_port);
        }
    }

    #[test]
    fn test_range_pairs_offsets() {
        let mappings = parse_port_spec("8000-8009=80-89").unwrap();
        assert_eq!(mappings.len(), 10);
        for (i, m) in mappings.iter().enumerate() {
            assert_eq!(m.host_port, 8000 + i as u16);
            assert_eq!(m.container_port, 80 + i as u16);
        }
    }

    #[test]
    fn test_host_range_without_container() {
        let mappings = parse_port_spec("7000-7002").unwrap();
        assert_eq!(
            mappings,
            vec![
                PortMapping::new(7000, 7000),
                PortMapping::new(7001, 7001),
                PortMapping::new(7002, 7002),
            ]
        );
    }

    #[test]
    fn test_host_range_with_single_container_offsets() {
        let mappings = parse_port_spec("8000-8002=3000").unwrap();
        assert_eq!(
            mappings,
            vec![
                PortMapping::new(8000, 3000),
                PortMapping::new(8001, 3001),
                PortMapping::new(8002, 3002),
            ]
        );
    }

    #[test]
    fn test_order_preserved_across_tokens() {
        let mappings = parse_port_spec("9000,8000-8001=80-81,7000=70").unwrap();
        let hosts: Vec<u16> = mappings.iter().map(|m| m.host_port).collect();
        assert_eq!(hosts, vec![9000, 8000, 8001, 7000]);
    }

    #[test]
    fn test_whitespace_is_tolerated() {
        let mappings = parse_port_spec(" 8000 = 80 , 9000 ").unwrap();
        assert_eq!(
            mappings,
            vec![PortMapping::new(8000, 80), PortMapping::new(9000, 9000)]
        );
    }

    // ===== Error Tests =====

    #[test]
    fn test_range_size_mismatch() {
        let err = parse_port_spec("8000-8009=80-84").unwrap_err();
        assert_eq!(
            err,
            PortSpecError::RangeMismatch {
                token: "8000-8009=80-84".to_string(),
                host: 10,
                container: 5,
            }
        );
    }

    #[test]
    fn test_single_host_with_container_range_mismatch() {
        let err = parse_port_spec("8000=80-81").unwrap_err();
        assert!(matches!(err, PortSpecError::RangeMismatch { .. }));
    }

    #[test]
    fn test_inverted_range() {
        let err = parse_port_spec("8010-8000=80-90").unwrap_err();
        assert!(matches!(err, PortSpecError::InvalidRange { .. }));

        let err = parse_port_spec("8000-8010=90-80").unwrap_err();
        assert!(matches!(err, PortSpecError::InvalidRange { .. }));
    }

    #[test]
    fn test_malformed_tokens() {
        let inputs = vec![
            "",
            "   ",
            "abc",
            "8000=",
            "=80",
            "8000=80=90",
            "8000,,9000",
            "70000",
            "0",
            "-5",
            "8000-",
            "8000-8001-8002",
            "8000=http",
        ];

        for input in inputs {
            let result = parse_port_spec(input);
            assert!(
                matches!(result, Err(PortSpecError::Parse { .. })),
                "expected parse error for {:?}, got {:?}",
                input,
                result
            );
        }
    }

    #[test]
    fn test_container_offset_overflow() {
        let result = parse_port_spec("8000-8001=65535");
        assert!(matches!(result, Err(PortSpecError::Parse { .. })));
    }

    #[test]
    fn test_duplicate_host_port() {
        let err = parse_port_spec("8000,7999-8001").unwrap_err();
        assert_eq!(err, PortSpecError::DuplicateHostPort(8000));
    }

    #[test]
    fn test_port_mapping_display() {
        assert_eq!(PortMapping::new(8000, 80).to_string(), "8000=80");
    }

    // ===== WatchTag Tests =====

    #[test]
    fn test_watch_tag_matches_sub_tags() {
        let tag = WatchTag::new("web");
        assert!(tag.matches("web"));
        assert!(tag.matches("web:v2"));
        assert!(tag.matches("web:latest"));
        assert!(!tag.matches("web-worker:v2"));
        assert!(!tag.matches("api"));
    }

    #[test]
    fn test_watch_tag_with_registry_port() {
        let tag = WatchTag::new("registry.local:5000/team/web");
        assert!(tag.matches("registry.local:5000/team/web"));
        assert!(tag.matches("registry.local:5000/team/web:v3"));
        assert!(!tag.matches("registry.local:5000/team/api:v3"));
    }

    #[test]
    fn test_watch_tag_exact_sub_tag() {
        let tag = WatchTag::new("web:v2");
        assert!(tag.matches("web:v2"));
        assert!(!tag.matches("web:v3"));
        assert!(!tag.matches("web"));
    }
}
