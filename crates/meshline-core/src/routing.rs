//! Routing rules and route descriptors
//!
//! Rules are produced and persisted by the rule table. The session layer
//! only ever reads them:
//!
//! - [`ForwardRule`]: how to address an outbound packet for one physical path
//! - [`ConsumeRule`]: how an inbound terminal packet maps back to its flow

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{Addr, Port, PubKey};

/// Identifier of one hop of a route, stamped on every packet
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RouteId(pub u32);

impl Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RouteId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Identifier of a transport link
///
/// Both ends of a link share the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransportId(pub Uuid);

impl TransportId {
    /// Generate a new random transport ID
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for TransportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two endpoints of a logical flow
///
/// A route group stores the descriptor from its own point of view: the
/// *destination* is always the local endpoint. Rules describe the outbound
/// direction, so a group is usually built from the inverted descriptor of
/// its first forward rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteDescriptor {
    src_pk: PubKey,
    dst_pk: PubKey,
    src_port: Port,
    dst_port: Port,
}

impl RouteDescriptor {
    /// Create a new route descriptor
    pub fn new(src_pk: PubKey, dst_pk: PubKey, src_port: Port, dst_port: Port) -> Self {
        Self {
            src_pk,
            dst_pk,
            src_port,
            dst_port,
        }
    }

    /// Source endpoint
    pub fn src(&self) -> Addr {
        Addr::new(self.src_pk, self.src_port)
    }

    /// Destination endpoint
    pub fn dst(&self) -> Addr {
        Addr::new(self.dst_pk, self.dst_port)
    }

    pub fn src_pk(&self) -> PubKey {
        self.src_pk
    }

    pub fn dst_pk(&self) -> PubKey {
        self.dst_pk
    }

    pub fn src_port(&self) -> Port {
        self.src_port
    }

    pub fn dst_port(&self) -> Port {
        self.dst_port
    }

    /// Swap source and destination
    pub fn invert(&self) -> Self {
        Self {
            src_pk: self.dst_pk,
            dst_pk: self.src_pk,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

impl Display for RouteDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src_pk.short_id(),
            self.src_port,
            self.dst_pk.short_id(),
            self.dst_port
        )
    }
}

/// Addressing record for one physical path of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRule {
    keep_alive: Duration,
    local_route_id: RouteId,
    remote_route_id: RouteId,
    transport_id: TransportId,
    desc: RouteDescriptor,
}

impl ForwardRule {
    /// Create a forward rule
    ///
    /// # Arguments
    /// * `local_route_id` - route ID this rule is stored under locally
    /// * `remote_route_id` - route ID stamped on outbound packets
    /// * `transport_id` - link the packets leave on
    /// * `desc` - the flow, source being the local endpoint
    pub fn new(
        keep_alive: Duration,
        local_route_id: RouteId,
        remote_route_id: RouteId,
        transport_id: TransportId,
        desc: RouteDescriptor,
    ) -> Self {
        Self {
            keep_alive,
            local_route_id,
            remote_route_id,
            transport_id,
            desc,
        }
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn local_route_id(&self) -> RouteId {
        self.local_route_id
    }

    pub fn remote_route_id(&self) -> RouteId {
        self.remote_route_id
    }

    pub fn transport_id(&self) -> TransportId {
        self.transport_id
    }

    pub fn route_descriptor(&self) -> RouteDescriptor {
        self.desc
    }
}

/// Maps an inbound terminal route ID back to its flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeRule {
    keep_alive: Duration,
    local_route_id: RouteId,
    desc: RouteDescriptor,
}

impl ConsumeRule {
    pub fn new(keep_alive: Duration, local_route_id: RouteId, desc: RouteDescriptor) -> Self {
        Self {
            keep_alive,
            local_route_id,
            desc,
        }
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn local_route_id(&self) -> RouteId {
        self.local_route_id
    }

    pub fn route_descriptor(&self) -> RouteDescriptor {
        self.desc
    }
}

/// Kind of a stored rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    Consume,
    Forward,
}

/// A rule as stored in the rule table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rule {
    Consume(ConsumeRule),
    Forward(ForwardRule),
}

impl Rule {
    /// The route ID the rule is keyed by
    pub fn key_route_id(&self) -> RouteId {
        match self {
            Rule::Consume(r) => r.local_route_id(),
            Rule::Forward(r) => r.local_route_id(),
        }
    }

    pub fn keep_alive(&self) -> Duration {
        match self {
            Rule::Consume(r) => r.keep_alive(),
            Rule::Forward(r) => r.keep_alive(),
        }
    }

    pub fn route_descriptor(&self) -> RouteDescriptor {
        match self {
            Rule::Consume(r) => r.route_descriptor(),
            Rule::Forward(r) => r.route_descriptor(),
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Consume(_) => RuleKind::Consume,
            Rule::Forward(_) => RuleKind::Forward,
        }
    }

    pub fn as_forward(&self) -> Option<&ForwardRule> {
        match self {
            Rule::Forward(r) => Some(r),
            Rule::Consume(_) => None,
        }
    }
}

impl From<ForwardRule> for Rule {
    fn from(rule: ForwardRule) -> Self {
        Rule::Forward(rule)
    }
}

impl From<ConsumeRule> for Rule {
    fn from(rule: ConsumeRule) -> Self {
        Rule::Consume(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::KeyPair;

    fn make_desc() -> RouteDescriptor {
        let keys = KeyPair::generate_many(2);
        RouteDescriptor::new(keys[0].public_key(), keys[1].public_key(), Port(1), Port(2))
    }

    #[test]
    fn test_descriptor_invert() {
        let desc = make_desc();
        let inverted = desc.invert();

        assert_eq!(inverted.src(), desc.dst());
        assert_eq!(inverted.dst(), desc.src());
        assert_eq!(inverted.invert(), desc);
    }

    #[test]
    fn test_forward_rule_fields() {
        let desc = make_desc();
        let tp = TransportId::new_random();
        let rule = ForwardRule::new(Duration::from_secs(30), RouteId(3), RouteId(9), tp, desc);

        assert_eq!(rule.keep_alive(), Duration::from_secs(30));
        assert_eq!(rule.local_route_id(), RouteId(3));
        assert_eq!(rule.remote_route_id(), RouteId(9));
        assert_eq!(rule.transport_id(), tp);
        assert_eq!(rule.route_descriptor(), desc);
    }

    #[test]
    fn test_rule_accessors() {
        let desc = make_desc();
        let fwd: Rule =
            ForwardRule::new(Duration::from_secs(1), RouteId(4), RouteId(5), TransportId::new_random(), desc)
                .into();
        let cnsm: Rule = ConsumeRule::new(Duration::from_secs(2), RouteId(6), desc.invert()).into();

        assert_eq!(fwd.key_route_id(), RouteId(4));
        assert_eq!(fwd.kind(), RuleKind::Forward);
        assert!(fwd.as_forward().is_some());

        assert_eq!(cnsm.key_route_id(), RouteId(6));
        assert_eq!(cnsm.kind(), RuleKind::Consume);
        assert_eq!(cnsm.keep_alive(), Duration::from_secs(2));
        assert!(cnsm.as_forward().is_none());
    }

    #[test]
    fn test_rule_serialization() {
        let rule: Rule = ForwardRule::new(
            Duration::from_millis(1500),
            RouteId(1),
            RouteId(2),
            TransportId::new_random(),
            make_desc(),
        )
        .into();

        let serialized = postcard::to_allocvec(&rule).unwrap();
        let deserialized: Rule = postcard::from_bytes(&serialized).unwrap();

        assert_eq!(rule, deserialized);
    }
}
