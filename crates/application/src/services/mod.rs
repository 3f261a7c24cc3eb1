mod chat_service;

pub use chat_service::{
    ChatService, ChatServiceDependencies, CREATE_SESSION_KEY, SESSION_STATUS_KEY,
};
