pub mod local;
pub mod webdav;
