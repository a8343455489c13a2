pub mod alarm;
pub mod command;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod generation;
pub mod logger;
pub mod message;
pub mod parser;
pub mod process_pool;
pub mod reporters;
pub mod repository;
pub mod resolver;
pub mod runnable;
pub mod scheduler;
pub mod text;
pub mod wake;
pub mod worker;
