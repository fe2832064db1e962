//! Per-document user roles
//!
//! Access is granted per document: owners administer it, editors record
//! edits, viewers read. Revoking the only owner is refused so no document
//! ever becomes unadministrable.

mod errors;

pub use errors::{UserError, UserResult};

use crate::store::StoreSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    None,
    Viewer,
    Editor,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::None => "none",
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Owner => "owner",
        }
    }

    pub fn parse(s: &str) -> UserResult<Role> {
        match s {
            "none" => Ok(Role::None),
            "viewer" => Ok(Role::Viewer),
            "editor" => Ok(Role::Editor),
            "owner" => Ok(Role::Owner),
            other => Err(UserError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUser {
    pub user_id: String,
    pub role: Role,
    pub name: Option<String>,
}

/// Grants `role` on a document, creating the user record if needed.
/// [`Role::None`] revokes access. Refuses to demote the only owner.
pub fn set_role(
    store: &StoreSession,
    document_id: i64,
    user_id: &str,
    role: Role,
) -> UserResult<()> {
    if role != Role::Owner
        && role_of(store, document_id, user_id)? == Role::Owner
        && owner_count(store, document_id)? == 1
    {
        return Err(UserError::LastOwner(document_id));
    }
    if role == Role::None {
        store.conn().execute(
            "DELETE FROM documents_users WHERE document_id = ?1 AND user_id = ?2",
            rusqlite::params![document_id, user_id],
        )?;
        return Ok(());
    }
    store.upsert_user(user_id, None)?;
    store.set_document_role(document_id, user_id, role.as_str())?;
    Ok(())
}

/// A user's role on a document, [`Role::None`] when none was granted.
pub fn role_of(store: &StoreSession, document_id: i64, user_id: &str) -> UserResult<Role> {
    let role: Option<String> = store
        .conn()
        .query_row(
            "SELECT role FROM documents_users WHERE document_id = ?1 AND user_id = ?2",
            rusqlite::params![document_id, user_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    match role {
        Some(role) => Role::parse(&role),
        None => Ok(Role::None),
    }
}

pub fn list(store: &StoreSession, document_id: i64) -> UserResult<Vec<DocumentUser>> {
    store
        .document_users(document_id)?
        .into_iter()
        .map(|(user_id, role, name)| {
            Ok(DocumentUser {
                user_id,
                role: Role::parse(&role)?,
                name,
            })
        })
        .collect()
}

pub fn can_view(store: &StoreSession, document_id: i64, user_id: &str) -> UserResult<bool> {
    Ok(role_of(store, document_id, user_id)? >= Role::Viewer)
}

pub fn can_edit(store: &StoreSession, document_id: i64, user_id: &str) -> UserResult<bool> {
    Ok(role_of(store, document_id, user_id)? >= Role::Editor)
}

pub fn is_owner(store: &StoreSession, document_id: i64, user_id: &str) -> UserResult<bool> {
    Ok(role_of(store, document_id, user_id)? == Role::Owner)
}

fn owner_count(store: &StoreSession, document_id: i64) -> UserResult<i64> {
    let count = store.conn().query_row(
        "SELECT COUNT(*) FROM documents_users WHERE document_id = ?1 AND role = 'owner'",
        [document_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> StoreSession {
        let store = StoreSession::open_in_memory().unwrap();
        store
            .insert_document(1, "//w", "doc", "/tmp/1.xml", "h")
            .unwrap();
        set_role(&store, 1, "alice", Role::Owner).unwrap();
        store
    }

    #[test]
    fn test_grant_and_query_roles() {
        let store = setup();
        set_role(&store, 1, "bob", Role::Editor).unwrap();
        set_role(&store, 1, "carol", Role::Viewer).unwrap();

        assert_eq!(role_of(&store, 1, "alice").unwrap(), Role::Owner);
        assert!(can_edit(&store, 1, "bob").unwrap());
        assert!(!can_edit(&store, 1, "carol").unwrap());
        assert!(can_view(&store, 1, "carol").unwrap());
        assert_eq!(role_of(&store, 1, "nobody").unwrap(), Role::None);
        assert!(!can_view(&store, 1, "nobody").unwrap());
    }

    #[test]
    fn test_last_owner_cannot_be_demoted() {
        let store = setup();
        assert!(matches!(
            set_role(&store, 1, "alice", Role::Editor),
            Err(UserError::LastOwner(1))
        ));
        assert!(matches!(
            set_role(&store, 1, "alice", Role::None),
            Err(UserError::LastOwner(1))
        ));
        assert_eq!(role_of(&store, 1, "alice").unwrap(), Role::Owner);
    }

    #[test]
    fn test_ownership_transfer() {
        let store = setup();
        set_role(&store, 1, "bob", Role::Owner).unwrap();
        set_role(&store, 1, "alice", Role::Viewer).unwrap();
        assert!(is_owner(&store, 1, "bob").unwrap());
        assert_eq!(role_of(&store, 1, "alice").unwrap(), Role::Viewer);
    }

    #[test]
    fn test_revoke_removes_listing() {
        let store = setup();
        set_role(&store, 1, "bob", Role::Viewer).unwrap();
        set_role(&store, 1, "bob", Role::None).unwrap();
        let users = list(&store, 1).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, "alice");
    }

    #[test]
    fn test_unknown_role_string_rejected() {
        assert!(matches!(
            Role::parse("admin"),
            Err(UserError::UnknownRole(_))
        ));
    }
}
