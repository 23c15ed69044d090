pub mod page_session_actor;
pub mod upstream_actor;
