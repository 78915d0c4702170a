pub mod canonical;
pub mod content;
pub mod openai_chat;
pub mod openai_responses;
pub mod tools;
