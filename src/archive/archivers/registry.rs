//! The ordered set of archivers a pass runs.

use super::{
    AccountDataArchiver, AdHocCallArchiver, ChatArchiver, ChatItemArchiver, ContactArchiver,
    GroupArchiver, LocalRecipientArchiver, RecordArchiver, StickerPackArchiver,
};
use crate::error::{Error, Result};
use crate::proto::RecordFamily;
use std::collections::HashMap;

/// Archivers in export order, indexed by family for import dispatch.
///
/// Every family appears at most once and after all families it depends on.
pub struct ArchiverRegistry {
    archivers: Vec<Box<dyn RecordArchiver>>,
    by_family: HashMap<RecordFamily, usize>,
}

impl ArchiverRegistry {
    /// The standard archiver set
    pub fn new() -> Result<Self> {
        Self::from_archivers(vec![
            Box::new(AccountDataArchiver),
            Box::new(LocalRecipientArchiver),
            Box::new(ContactArchiver),
            Box::new(GroupArchiver),
            Box::new(ChatArchiver),
            Box::new(ChatItemArchiver),
            Box::new(StickerPackArchiver),
            Box::new(AdHocCallArchiver),
        ])
    }

    /// Build from an explicit list, checking uniqueness and dependency order
    pub fn from_archivers(archivers: Vec<Box<dyn RecordArchiver>>) -> Result<Self> {
        let mut by_family = HashMap::with_capacity(archivers.len());
        for (index, archiver) in archivers.iter().enumerate() {
            let family = archiver.family();
            if matches!(family, RecordFamily::Header | RecordFamily::Unknown) {
                return Err(Error::Internal(format!("{} cannot have an archiver", family)));
            }
            for dependency in family.dependencies() {
                if !by_family.contains_key(dependency) {
                    return Err(Error::Internal(format!(
                        "archiver for {} registered before its dependency {}",
                        family, dependency
                    )));
                }
            }
            if by_family.insert(family, index).is_some() {
                return Err(Error::Internal(format!("duplicate archiver for {}", family)));
            }
        }
        Ok(Self {
            archivers,
            by_family,
        })
    }

    /// Archivers in export order
    pub fn iter(&self) -> impl Iterator<Item = &dyn RecordArchiver> {
        self.archivers.iter().map(|a| a.as_ref())
    }

    /// The archiver restoring `family`, if one is registered
    pub fn for_family(&self, family: RecordFamily) -> Option<&dyn RecordArchiver> {
        self.by_family
            .get(&family)
            .map(|&index| self.archivers[index].as_ref())
    }

    /// Number of registered archivers
    pub fn len(&self) -> usize {
        self.archivers.len()
    }

    /// Whether no archivers are registered
    pub fn is_empty(&self) -> bool {
        self.archivers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_set_follows_export_order() {
        let registry = ArchiverRegistry::new().unwrap();
        let families: Vec<_> = registry.iter().map(|a| a.family()).collect();
        assert_eq!(families, RecordFamily::EXPORT_ORDER.to_vec());
        assert_eq!(
            registry.for_family(RecordFamily::ChatItem).map(|a| a.family()),
            Some(RecordFamily::ChatItem)
        );
        assert!(registry.for_family(RecordFamily::Unknown).is_none());
    }

    #[test]
    fn test_dependency_out_of_order_is_rejected() {
        let result = ArchiverRegistry::from_archivers(vec![
            Box::new(ChatArchiver),
            Box::new(LocalRecipientArchiver),
        ]);
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[test]
    fn test_duplicate_family_is_rejected() {
        let result = ArchiverRegistry::from_archivers(vec![
            Box::new(AccountDataArchiver),
            Box::new(AccountDataArchiver),
        ]);
        assert!(matches!(result, Err(Error::Internal(_))));
    }
}
