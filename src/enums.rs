//! Wire-level enumerations from the NodeInfo and PortInfo attributes.

use std::fmt;

/// Node type as encoded in NodeInfo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IbNodeType {
    CA,
    Switch,
    Router,
}

impl IbNodeType {
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            1 => Some(IbNodeType::CA),
            2 => Some(IbNodeType::Switch),
            3 => Some(IbNodeType::Router),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            IbNodeType::CA => 1,
            IbNodeType::Switch => 2,
            IbNodeType::Router => 3,
        }
    }
}

impl fmt::Display for IbNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IbNodeType::CA => write!(f, "CA"),
            IbNodeType::Switch => write!(f, "Switch"),
            IbNodeType::Router => write!(f, "Router"),
        }
    }
}

/// Logical link state from PortInfo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IbPortLinkLayerState {
    NoStateChange,
    Down,
    Initialize,
    Armed,
    Active,
    Unknown,
}

impl IbPortLinkLayerState {
    pub fn from_wire(v: u8) -> Self {
        match v {
            0 => IbPortLinkLayerState::NoStateChange,
            1 => IbPortLinkLayerState::Down,
            2 => IbPortLinkLayerState::Initialize,
            3 => IbPortLinkLayerState::Armed,
            4 => IbPortLinkLayerState::Active,
            _ => IbPortLinkLayerState::Unknown,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            IbPortLinkLayerState::NoStateChange => 0,
            IbPortLinkLayerState::Down => 1,
            IbPortLinkLayerState::Initialize => 2,
            IbPortLinkLayerState::Armed => 3,
            IbPortLinkLayerState::Active => 4,
            IbPortLinkLayerState::Unknown => 0xf,
        }
    }
}

/// Physical port state from PortInfo. `LinkUp` is the discriminator the
/// discovery walk uses to decide whether a peer probe is worthwhile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IbPortPhyState {
    Sleep,
    Polling,
    Disabled,
    PortConfigTraining,
    LinkUp,
    LinkErrorRecovery,
    PhyTest,
    Unknown,
}

impl IbPortPhyState {
    pub fn from_wire(v: u8) -> Self {
        match v {
            1 => IbPortPhyState::Sleep,
            2 => IbPortPhyState::Polling,
            3 => IbPortPhyState::Disabled,
            4 => IbPortPhyState::PortConfigTraining,
            5 => IbPortPhyState::LinkUp,
            6 => IbPortPhyState::LinkErrorRecovery,
            7 => IbPortPhyState::PhyTest,
            _ => IbPortPhyState::Unknown,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            IbPortPhyState::Sleep => 1,
            IbPortPhyState::Polling => 2,
            IbPortPhyState::Disabled => 3,
            IbPortPhyState::PortConfigTraining => 4,
            IbPortPhyState::LinkUp => 5,
            IbPortPhyState::LinkErrorRecovery => 6,
            IbPortPhyState::PhyTest => 7,
            IbPortPhyState::Unknown => 0xf,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_wire_values() {
        assert_eq!(IbNodeType::from_wire(2), Some(IbNodeType::Switch));
        assert_eq!(IbNodeType::from_wire(0), None);
        assert_eq!(IbNodeType::Router.to_wire(), 3);
    }

    #[test]
    fn phy_state_linkup_is_five() {
        assert_eq!(IbPortPhyState::from_wire(5), IbPortPhyState::LinkUp);
        assert_eq!(IbPortPhyState::LinkUp.to_wire(), 5);
    }
}
