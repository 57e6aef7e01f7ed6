use crate::model::Id;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::collections::BTreeSet;
use thiserror::Error;

pub const USER_NAME_MAX_LEN: usize = 50;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

/// The public face of a user, as embedded wherever a post or comment names
/// its author.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub name: UserName,
}

/// The acting user of a request, resolved by the auth gate and handed to every
/// post operation explicitly.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct Identity {
    pub user: User,
    pub following: BTreeSet<Id<UserMarker>>,
}

impl Identity {
    #[must_use]
    pub fn id(&self) -> Id<UserMarker> {
        self.user.id
    }

    #[must_use]
    pub fn follows(&self, user_id: Id<UserMarker>) -> bool {
        self.following.contains(&user_id)
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct UserName(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The user name is invalid: {0:?}")]
pub struct InvalidUserNameError(String);

impl UserName {
    pub fn new(name: String) -> Result<Self, InvalidUserNameError> {
        let len = name.chars().count();
        if len > 0 && len <= USER_NAME_MAX_LEN {
            Ok(UserName(name))
        } else {
            Err(InvalidUserNameError(name))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl<'de> Deserialize<'de> for UserName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        UserName::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"UserName"))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        user::{Identity, USER_NAME_MAX_LEN, User, UserName},
    };
    use std::collections::BTreeSet;

    #[test]
    fn user_name_length() {
        assert!(UserName::new("ada".to_owned()).is_ok());
        assert!(UserName::new("a".repeat(USER_NAME_MAX_LEN)).is_ok());
        // Counted in characters, not bytes.
        assert!(UserName::new("ü".repeat(USER_NAME_MAX_LEN)).is_ok());

        assert!(UserName::new(String::new()).is_err());
        assert!(UserName::new("a".repeat(USER_NAME_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn user_name_deserialization_validates() {
        assert_eq!(
            serde_json::from_str::<UserName>("\"grace\"").unwrap().get(),
            "grace"
        );
        assert!(serde_json::from_str::<UserName>("\"\"").is_err());
    }

    #[test]
    fn identity_follows() {
        let identity = Identity {
            user: User {
                id: Id::from(1_u64),
                name: UserName::new("ada".to_owned()).unwrap(),
            },
            following: BTreeSet::from([Id::from(2_u64), Id::from(3_u64)]),
        };

        assert_eq!(identity.id(), Id::from(1_u64));
        assert!(identity.follows(Id::from(2_u64)));
        assert!(!identity.follows(Id::from(1_u64)));
    }
}
