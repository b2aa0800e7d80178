pub mod changes;
pub mod identifier_mappings;
pub mod investors;
pub mod snapshots;
