//! Caller identity as decoded by the authentication layer.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{TypesError, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Teacher,
    Student,
}

impl FromStr for Role {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TEACHER" => Ok(Self::Teacher),
            "STUDENT" => Ok(Self::Student),
            _ => Err(TypesError::InvalidRole(s.to_string())),
        }
    }
}

/// An authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn teacher(id: UserId) -> Self {
        Self {
            id,
            role: Role::Teacher,
        }
    }

    pub fn student(id: UserId) -> Self {
        Self {
            id,
            role: Role::Student,
        }
    }

    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}
