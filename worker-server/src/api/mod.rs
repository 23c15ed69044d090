pub mod popup;

pub use popup::configure;
