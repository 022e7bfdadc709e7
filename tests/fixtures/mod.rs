#![allow(dead_code)]

pub mod chat;
