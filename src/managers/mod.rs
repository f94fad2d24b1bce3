// smartmarks state managers
// The reconciliation core: collection, identity-scoped store, session, mutations and push ingestion.

pub mod bookmark_collection;
pub mod bookmark_store;
pub mod event_ingestion;
pub mod mutation_pipeline;
pub mod session_manager;
