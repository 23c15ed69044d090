pub mod relay_session_actor;
