//! Role and ownership checks.

use baton_store::SessionRecord;
use baton_types::{Identity, Role, UserId};

use crate::RelayError;

/// The caller must be the teacher who owns `session`.
pub fn require_session_teacher(
    identity: &Identity,
    session: &SessionRecord,
) -> Result<(), RelayError> {
    if identity.role != Role::Teacher {
        return Err(RelayError::Forbidden("teacher role required".to_string()));
    }
    if identity.id != session.teacher_id {
        return Err(RelayError::Forbidden(format!(
            "session {} belongs to another teacher",
            session.id
        )));
    }
    Ok(())
}

pub fn require_teacher(identity: &Identity) -> Result<(), RelayError> {
    match identity.role {
        Role::Teacher => Ok(()),
        Role::Student => Err(RelayError::Forbidden("teacher role required".to_string())),
    }
}

pub fn require_student(identity: &Identity) -> Result<(), RelayError> {
    match identity.role {
        Role::Student => Ok(()),
        Role::Teacher => Err(RelayError::Forbidden("student role required".to_string())),
    }
}

/// A student acting on their own record, or the session's teacher.
pub fn require_self_or_teacher(
    identity: &Identity,
    student_id: &UserId,
    session: &SessionRecord,
) -> Result<(), RelayError> {
    if identity.role == Role::Student && identity.id == *student_id {
        return Ok(());
    }
    require_session_teacher(identity, session)
}
