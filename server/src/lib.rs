//! Real-time messaging core: authenticated live sessions, conversation
//! groups, message fan-out, delivery/read receipts, presence and typing.

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod conversations;
pub mod db;
pub mod error;
pub mod groups;
pub mod hub;
pub mod membership;
pub mod messages;
pub mod notify;
pub mod obfuscation;
pub mod pipeline;
pub mod presence;
pub mod reads;
pub mod receipts;
pub mod typing;
pub mod users;
pub mod ws;
