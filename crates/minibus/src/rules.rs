//! Signal match rules.
//!
//! A rule is a conjunction of optional equality predicates over a signal's
//! header fields. The same rule renders into the daemon's `AddMatch`
//! string syntax.

use std::fmt;

use minibus_types::{BusName, InterfaceName, MemberName, ObjectPath};

use crate::message::Signal;

/// Matches signals whose present header fields equal every field set here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    pub sender: Option<BusName>,
    pub destination: Option<BusName>,
    pub path: Option<ObjectPath>,
    pub interface: Option<InterfaceName>,
    pub member: Option<MemberName>,
}

impl MatchRule {
    /// The rule with no predicates: matches every signal that has a
    /// sender.
    pub fn any() -> MatchRule {
        MatchRule::default()
    }

    pub fn with_sender(mut self, sender: BusName) -> MatchRule {
        self.sender = Some(sender);
        self
    }

    pub fn with_destination(mut self, destination: BusName) -> MatchRule {
        self.destination = Some(destination);
        self
    }

    pub fn with_path(mut self, path: ObjectPath) -> MatchRule {
        self.path = Some(path);
        self
    }

    pub fn with_interface(mut self, interface: InterfaceName) -> MatchRule {
        self.interface = Some(interface);
        self
    }

    pub fn with_member(mut self, member: MemberName) -> MatchRule {
        self.member = Some(member);
        self
    }

    /// Whether this rule matches the signal. A signal with no sender never
    /// matches.
    pub fn matches(&self, signal: &Signal) -> bool {
        fn agrees<T: PartialEq>(wanted: &Option<T>, actual: Option<&T>) -> bool {
            match wanted {
                None => true,
                Some(wanted) => actual == Some(wanted),
            }
        }

        signal.sender.is_some()
            && agrees(&self.sender, signal.sender.as_ref())
            && agrees(&self.destination, signal.destination.as_ref())
            && agrees(&self.path, Some(&signal.path))
            && agrees(&self.interface, Some(&signal.interface))
            && agrees(&self.member, Some(&signal.member))
    }
}

/// The daemon's match-rule syntax: `key='value'` predicates joined by
/// commas, in the fixed order sender, destination, path, interface,
/// member. Unset fields are omitted.
impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: [(&str, Option<&str>); 5] = [
            ("sender", self.sender.as_ref().map(BusName::as_str)),
            ("destination", self.destination.as_ref().map(BusName::as_str)),
            ("path", self.path.as_ref().map(ObjectPath::as_str)),
            ("interface", self.interface.as_ref().map(InterfaceName::as_str)),
            ("member", self.member.as_ref().map(MemberName::as_str)),
        ];
        let mut first = true;
        for (key, value) in fields {
            if let Some(value) = value {
                if !first {
                    f.write_str(",")?;
                }
                first = false;
                write!(f, "{key}='{value}'")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal() -> Signal {
        Signal::new(
            ObjectPath::from_static("/a"),
            InterfaceName::from_static("org.example.Iface"),
            MemberName::from_static("Changed"),
        )
        .with_sender(BusName::from_static(":1.7"))
    }

    #[test]
    fn empty_rule_matches_any_signal_with_a_sender() {
        assert!(MatchRule::any().matches(&signal()));

        let mut anonymous = signal();
        anonymous.sender = None;
        assert!(!MatchRule::any().matches(&anonymous));
    }

    #[test]
    fn each_field_filters() {
        let s = signal();

        assert!(MatchRule::any()
            .with_path(ObjectPath::from_static("/a"))
            .matches(&s));
        assert!(!MatchRule::any()
            .with_path(ObjectPath::from_static("/b"))
            .matches(&s));

        assert!(MatchRule::any()
            .with_sender(BusName::from_static(":1.7"))
            .matches(&s));
        assert!(!MatchRule::any()
            .with_sender(BusName::from_static(":1.8"))
            .matches(&s));

        assert!(MatchRule::any()
            .with_interface(InterfaceName::from_static("org.example.Iface"))
            .with_member(MemberName::from_static("Changed"))
            .matches(&s));
        assert!(!MatchRule::any()
            .with_member(MemberName::from_static("Other"))
            .matches(&s));

        // destination is only compared when the signal carries one
        assert!(!MatchRule::any()
            .with_destination(BusName::from_static(":1.9"))
            .matches(&s));
        let addressed = signal().with_destination(BusName::from_static(":1.9"));
        assert!(MatchRule::any()
            .with_destination(BusName::from_static(":1.9"))
            .matches(&addressed));
    }

    #[test]
    fn conjunction_over_all_fields() {
        let rule = MatchRule::any()
            .with_path(ObjectPath::from_static("/a"))
            .with_member(MemberName::from_static("Changed"));
        assert!(rule.matches(&signal()));

        let rule = rule.with_interface(InterfaceName::from_static("org.other.Iface"));
        assert!(!rule.matches(&signal()));
    }

    #[test]
    fn formatting_uses_fixed_order() {
        assert_eq!(MatchRule::any().to_string(), "");

        let rule = MatchRule::any().with_path(ObjectPath::from_static("/a"));
        assert_eq!(rule.to_string(), "path='/a'");

        let rule = MatchRule::any()
            .with_member(MemberName::from_static("Changed"))
            .with_sender(BusName::from_static("org.example.App"))
            .with_interface(InterfaceName::from_static("org.example.Iface"));
        assert_eq!(
            rule.to_string(),
            "sender='org.example.App',interface='org.example.Iface',member='Changed'"
        );
    }
}
