//! Operation names accepted by the router

use crate::RouterError;
use std::fmt;
use std::str::FromStr;

/// How the caller relates to a dispatched operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Caller continues immediately; the outcome is only logged unless the
    /// caller chooses to await the completion
    FireAndForget,
    /// Caller awaits the reply
    Reply,
}

/// The write half of the operation set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

/// Named persistence operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    InsertData,
    UpdateData,
    DeleteData,
    GetData,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::InsertData,
        Operation::UpdateData,
        Operation::DeleteData,
        Operation::GetData,
    ];

    /// Message name on the wire
    pub fn name(self) -> &'static str {
        match self {
            Operation::InsertData => "insertData",
            Operation::UpdateData => "updateData",
            Operation::DeleteData => "deleteData",
            Operation::GetData => "getData",
        }
    }

    pub fn mode(self) -> DispatchMode {
        match self {
            Operation::GetData => DispatchMode::Reply,
            _ => DispatchMode::FireAndForget,
        }
    }

    pub fn write_kind(self) -> Option<WriteKind> {
        match self {
            Operation::InsertData => Some(WriteKind::Insert),
            Operation::UpdateData => Some(WriteKind::Update),
            Operation::DeleteData => Some(WriteKind::Delete),
            Operation::GetData => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| RouterError::UnknownOperation(s.to_string()))
    }
}
