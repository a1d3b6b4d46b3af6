pub mod media;
pub mod story;
pub mod user;

pub use media::MediaRef;
pub use story::{ReactionKind, Reply, Story, StoryRecord};
pub use user::User;
