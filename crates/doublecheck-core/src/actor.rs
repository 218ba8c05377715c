//! Actor identities.

use std::fmt::Debug;
use std::hash::Hash;

/// Identity that receives a request and later answers it.
///
/// The broker only hashes and compares actors. `is_addressable` lets an
/// identity type declare values that must never own a request (the nil
/// UUID, a blank name); `submit` rejects those with
/// [`RegistrationError::UnaddressableActor`](crate::RegistrationError::UnaddressableActor).
pub trait Actor: Eq + Hash + Clone + Debug + Send + Sync + 'static {
    fn is_addressable(&self) -> bool {
        true
    }
}

impl Actor for String {
    fn is_addressable(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Actor for u64 {}

impl Actor for uuid::Uuid {
    fn is_addressable(&self) -> bool {
        !self.is_nil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_and_nil_uuids_are_not_addressable() {
        assert!("alice".to_string().is_addressable());
        assert!(!"   ".to_string().is_addressable());
        assert!(!String::new().is_addressable());
        assert!(!uuid::Uuid::nil().is_addressable());
        assert!(uuid::Uuid::new_v4().is_addressable());
        assert!(0u64.is_addressable());
    }
}
