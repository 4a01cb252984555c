//! Chat sessions: persistence port, session store, stream ingestion,
//! response versioning and the orchestrating service.

pub mod ingestor;
pub mod memory;
pub mod repository;
pub mod service;
pub mod store;
pub mod title;
pub mod versions;
