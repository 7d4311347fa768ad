pub mod dedup;
pub mod media;
pub mod quota;
pub mod session;
pub mod transfer_service;
pub mod upload_service;
pub mod worker;
