//! Core types for the service registry.

use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use crate::error::{RegistryError, Result};

/// Kind of a change event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An instance became visible.
    Up,
    /// An existing instance changed its metadata.
    Update,
    /// An instance was removed.
    Down,
    /// A new leader was elected.
    Leader,
    /// Catch-all for values outside the closed set. Unrecognized strings
    /// decode to this without error; it carries no mask bit, so such events
    /// never reach a subscriber.
    #[default]
    Unknown,
}

impl EventKind {
    /// The wire representation, also used by `Display`.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Up => "up",
            EventKind::Update => "update",
            EventKind::Down => "down",
            EventKind::Leader => "leader",
            EventKind::Unknown => "unknown",
        }
    }

    fn from_wire(s: &str) -> EventKind {
        match s {
            "up" => EventKind::Up,
            "update" => EventKind::Update,
            "down" => EventKind::Down,
            "leader" => EventKind::Leader,
            _ => EventKind::Unknown,
        }
    }

    /// The mask bit selecting this kind. `Unknown` has no bit.
    pub const fn mask(self) -> EventMask {
        match self {
            EventKind::Up => EventMask::UP,
            EventKind::Update => EventMask::UPDATE,
            EventKind::Down => EventMask::DOWN,
            EventKind::Leader => EventMask::LEADER,
            EventKind::Unknown => EventMask::NONE,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EventKind::from_wire(&s))
    }
}

/// Bit set of event kinds used to filter subscriptions.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u8);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const UP: EventMask = EventMask(1);
    pub const UPDATE: EventMask = EventMask(1 << 1);
    pub const DOWN: EventMask = EventMask(1 << 2);
    pub const LEADER: EventMask = EventMask(1 << 3);
    pub const ALL: EventMask = EventMask(0b1111);

    /// Whether events of `kind` pass this filter.
    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.mask().0 != 0
    }

    /// Whether any bit is shared with `other`.
    pub const fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds = [
            EventKind::Up,
            EventKind::Update,
            EventKind::Down,
            EventKind::Leader,
        ];
        let names: Vec<&str> = kinds
            .into_iter()
            .filter(|k| self.contains(*k))
            .map(|k| k.as_str())
            .collect();
        write!(f, "EventMask({})", names.join("|"))
    }
}

/// A single running instance of a service.
///
/// Instances are immutable once handed to the registry; the registry shares
/// them by reference with snapshots, events, and subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique within the service, defined as `hex(MD5(proto + "-" + addr))`.
    pub id: String,

    /// The host:port address that can be used to communicate with the
    /// instance. It must be valid to dial this address.
    pub addr: String,

    /// Protocol used to connect, e.g. tcp, udp, http. Lowercase alphanumeric.
    pub proto: String,

    /// Arbitrary metadata specified when registering the instance.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,

    /// Logical epoch of the initial registration. Assigned by the external
    /// log: unique, greater than zero, stable while the instance stays
    /// registered, and ordered by registration time.
    #[serde(default, skip_serializing_if = "index_is_zero")]
    pub index: u64,
}

fn index_is_zero(index: &u64) -> bool {
    *index == 0
}

impl Instance {
    /// Create an instance for a proto/addr pair, deriving its id.
    pub fn new(proto: impl Into<String>, addr: impl Into<String>) -> Self {
        let proto = proto.into();
        let addr = addr.into();
        let id = compute_id(&proto, &addr);
        Self {
            id,
            addr,
            proto,
            meta: HashMap::new(),
            index: 0,
        }
    }

    /// Attach registration metadata.
    pub fn with_meta(mut self, meta: HashMap<String, String>) -> Self {
        self.meta = meta;
        self
    }

    /// Set the registration index.
    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    /// Change-detection comparison over `addr`, `proto`, and `meta`.
    ///
    /// `index` is deliberately excluded (and `id` coincides by construction),
    /// so a re-registration that only bumps the epoch counts as unchanged and
    /// emits no update event.
    pub fn equal(&self, other: &Instance) -> bool {
        self.addr == other.addr && self.proto == other.proto && self.meta == other.meta
    }

    /// Validate the descriptor: proto grammar, dialable address, and that
    /// `id` matches the derived digest.
    pub fn valid(&self) -> Result<()> {
        self.valid_proto()?;
        split_host_port(&self.addr)?;
        let expected = compute_id(&self.proto, &self.addr);
        if self.id != expected {
            return Err(RegistryError::IdMismatch { expected });
        }
        Ok(())
    }

    fn valid_proto(&self) -> Result<()> {
        if self.proto.is_empty() {
            return Err(RegistryError::UnsetProto);
        }
        if !self
            .proto
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return Err(RegistryError::InvalidProto);
        }
        Ok(())
    }
}

/// Derive the content-addressed instance id for a proto/addr pair:
/// the lowercase hex MD5 digest of `proto + "-" + addr`.
pub fn compute_id(proto: &str, addr: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(proto.as_bytes());
    hasher.update(b"-");
    hasher.update(addr.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a service name against the `[a-z0-9-]+` grammar.
pub fn valid_service_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RegistryError::UnsetService);
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(RegistryError::InvalidService);
    }
    Ok(())
}

/// Split `addr` into host and port. The host may be empty and IPv6 hosts
/// must be bracketed; the port must be present and non-empty.
fn split_host_port(addr: &str) -> Result<(&str, &str)> {
    let invalid = || RegistryError::InvalidAddr(addr.to_string());

    if let Some(rest) = addr.strip_prefix('[') {
        let end = rest.find(']').ok_or_else(invalid)?;
        let host = &rest[..end];
        let port = rest[end + 1..].strip_prefix(':').ok_or_else(invalid)?;
        if port.is_empty() || port.contains(':') {
            return Err(invalid());
        }
        return Ok((host, port));
    }

    let colon = addr.rfind(':').ok_or_else(invalid)?;
    let (host, port) = (&addr[..colon], &addr[colon + 1..]);
    if host.contains(':') || port.is_empty() {
        return Err(invalid());
    }
    Ok((host, port))
}

/// A change notification delivered to subscribers.
///
/// The embedded instance is a shared immutable snapshot, never a copy per
/// subscriber.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub service: String,
    pub kind: EventKind,
    pub instance: Arc<Instance>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} ({})",
            self.service, self.kind, self.instance.id, self.instance.addr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compute_id_matches_digest() {
        // Independently computed MD5 of "http-10.0.0.1:80".
        assert_eq!(
            compute_id("http", "10.0.0.1:80"),
            "d9e73816e6d15c5664df9d9d087b858b"
        );
        assert_eq!(compute_id("http", "10.0.0.1:80").len(), 32);
        // Deterministic
        assert_eq!(
            compute_id("tcp", "127.0.0.1:6379"),
            compute_id("tcp", "127.0.0.1:6379")
        );
    }

    #[test]
    fn test_instance_new_derives_id() {
        let inst = Instance::new("http", "10.0.0.1:80");
        assert_eq!(inst.id, "d9e73816e6d15c5664df9d9d087b858b");
        assert!(inst.valid().is_ok());
    }

    #[test]
    fn test_valid_rejects_bad_proto() {
        let mut inst = Instance::new("", "10.0.0.1:80");
        assert_eq!(inst.valid(), Err(RegistryError::UnsetProto));

        inst = Instance::new("HTTP", "10.0.0.1:80");
        assert_eq!(inst.valid(), Err(RegistryError::InvalidProto));

        inst = Instance::new("http-2", "10.0.0.1:80");
        assert_eq!(inst.valid(), Err(RegistryError::InvalidProto));
    }

    #[test]
    fn test_valid_rejects_bad_addr() {
        let inst = Instance::new("http", "10.0.0.1");
        assert!(matches!(inst.valid(), Err(RegistryError::InvalidAddr(_))));

        let inst = Instance::new("http", "10.0.0.1:");
        assert!(matches!(inst.valid(), Err(RegistryError::InvalidAddr(_))));

        // Unbracketed IPv6 has too many colons
        let inst = Instance::new("http", "::1:80");
        assert!(matches!(inst.valid(), Err(RegistryError::InvalidAddr(_))));
    }

    #[test]
    fn test_valid_accepts_edge_addrs() {
        // Empty host is allowed
        assert!(Instance::new("http", ":80").valid().is_ok());
        // Hostname
        assert!(Instance::new("https", "example.com:443").valid().is_ok());
        // Bracketed IPv6
        assert!(Instance::new("tcp", "[::1]:6379").valid().is_ok());
    }

    #[test]
    fn test_valid_detects_id_mismatch() {
        let mut inst = Instance::new("http", "10.0.0.1:80");
        inst.id = "0000000000000000000000000000000f".to_string();
        assert!(matches!(inst.valid(), Err(RegistryError::IdMismatch { .. })));
    }

    #[test]
    fn test_equal_ignores_index() {
        let a = Instance::new("http", "10.0.0.1:80").with_index(5);
        let b = Instance::new("http", "10.0.0.1:80").with_index(9);
        assert!(a.equal(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_equal_compares_meta() {
        let a = Instance::new("http", "10.0.0.1:80");
        let b = Instance::new("http", "10.0.0.1:80")
            .with_meta(HashMap::from([("zone".to_string(), "east".to_string())]));
        assert!(!a.equal(&b));
        assert!(b.equal(&b.clone()));
    }

    #[test]
    fn test_valid_service_name() {
        assert!(valid_service_name("web").is_ok());
        assert!(valid_service_name("web-2").is_ok());
        assert_eq!(valid_service_name(""), Err(RegistryError::UnsetService));
        assert_eq!(valid_service_name("Web"), Err(RegistryError::InvalidService));
        assert_eq!(
            valid_service_name("web_2"),
            Err(RegistryError::InvalidService)
        );
    }

    #[test]
    fn test_mask_contains() {
        let mask = EventMask::UP | EventMask::DOWN;
        assert!(mask.contains(EventKind::Up));
        assert!(mask.contains(EventKind::Down));
        assert!(!mask.contains(EventKind::Update));
        assert!(!mask.contains(EventKind::Leader));
        assert!(EventMask::ALL.contains(EventKind::Leader));
        // Unknown has no bit, even against ALL
        assert!(!EventMask::ALL.contains(EventKind::Unknown));
        assert!(EventMask::NONE.is_empty());
    }

    #[test]
    fn test_event_kind_wire_format() {
        assert_eq!(serde_json::to_value(EventKind::Up).unwrap(), json!("up"));
        assert_eq!(
            serde_json::to_value(EventKind::Leader).unwrap(),
            json!("leader")
        );
        assert_eq!(
            serde_json::to_value(EventKind::Unknown).unwrap(),
            json!("unknown")
        );

        let kind: EventKind = serde_json::from_value(json!("down")).unwrap();
        assert_eq!(kind, EventKind::Down);
        // Lenient decode: unrecognized strings become Unknown, not an error
        let kind: EventKind = serde_json::from_value(json!("sideways")).unwrap();
        assert_eq!(kind, EventKind::Unknown);
    }

    #[test]
    fn test_instance_json_shape() {
        let inst = Instance::new("http", "10.0.0.1:80");
        let value = serde_json::to_value(&inst).unwrap();
        // meta and index are omitted when empty/zero
        assert_eq!(
            value,
            json!({
                "id": "d9e73816e6d15c5664df9d9d087b858b",
                "addr": "10.0.0.1:80",
                "proto": "http",
            })
        );

        let inst = inst
            .with_meta(HashMap::from([("zone".to_string(), "east".to_string())]))
            .with_index(7);
        let value = serde_json::to_value(&inst).unwrap();
        assert_eq!(value["meta"]["zone"], "east");
        assert_eq!(value["index"], 7);

        // Absent meta/index default on decode
        let decoded: Instance = serde_json::from_value(json!({
            "id": "d9e73816e6d15c5664df9d9d087b858b",
            "addr": "10.0.0.1:80",
            "proto": "http",
        }))
        .unwrap();
        assert!(decoded.meta.is_empty());
        assert_eq!(decoded.index, 0);
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event {
            service: "web".to_string(),
            kind: EventKind::Up,
            instance: Arc::new(Instance::new("http", "10.0.0.1:80").with_index(3)),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["service"], "web");
        assert_eq!(value["kind"], "up");
        assert_eq!(value["instance"]["addr"], "10.0.0.1:80");

        let decoded: Event = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, event);
    }
}
