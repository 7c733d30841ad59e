pub mod approval;
pub mod document;
pub mod identity;
pub mod notification;
