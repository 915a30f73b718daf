pub mod models;

pub use models::{Comment, CommentView, Post, PostView, TokenData, User, UserView};
