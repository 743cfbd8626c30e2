//! The persona tag set.

/// A logical role a vault takes on when processing a message.
///
/// The discriminants are wire values relied on by the deployed network and
/// must never be renumbered.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(u8)]
pub enum Persona {
    /// A client node acting with its MAID identity.
    MaidNode = 0,
    /// A client node acting with its MPID identity.
    MpidNode = 1,
    /// Custodian of a client account.
    MaidManager = 2,
    /// Custodian of structured-data version histories.
    VersionHandler = 3,
    /// Custodian of a datum's holder list.
    DataManager = 4,
    /// Custodian of a storage node's account.
    PmidManager = 5,
    /// A storage node holding chunk payloads on disk.
    PmidNode = 6,
    /// A client node fetching public data.
    DataGetter = 7,
    /// Custodian of a public messaging account.
    MpidManager = 8,
}

impl Persona {
    /// The stable wire id of this persona.
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Decode a wire id, `None` for tags this node does not know.
    pub fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::MaidNode),
            1 => Some(Self::MpidNode),
            2 => Some(Self::MaidManager),
            3 => Some(Self::VersionHandler),
            4 => Some(Self::DataManager),
            5 => Some(Self::PmidManager),
            6 => Some(Self::PmidNode),
            7 => Some(Self::DataGetter),
            8 => Some(Self::MpidManager),
            _ => None,
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MaidNode => "MaidNode",
            Self::MpidNode => "MpidNode",
            Self::MaidManager => "MaidManager",
            Self::VersionHandler => "VersionHandler",
            Self::DataManager => "DataManager",
            Self::PmidManager => "PmidManager",
            Self::PmidNode => "PmidNode",
            Self::DataGetter => "DataGetter",
            Self::MpidManager => "MpidManager",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wire_ids_are_stable() {
        const F: &[(Persona, u8)] = &[
            (Persona::MaidNode, 0),
            (Persona::MpidNode, 1),
            (Persona::MaidManager, 2),
            (Persona::VersionHandler, 3),
            (Persona::DataManager, 4),
            (Persona::PmidManager, 5),
            (Persona::PmidNode, 6),
            (Persona::DataGetter, 7),
            (Persona::MpidManager, 8),
        ];
        for (p, id) in F {
            assert_eq!(*id, p.to_wire());
            assert_eq!(Some(*p), Persona::from_wire(*id));
        }
        assert_eq!(None, Persona::from_wire(9));
        assert_eq!(None, Persona::from_wire(255));
    }
}
