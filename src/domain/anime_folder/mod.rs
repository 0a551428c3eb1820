pub mod entity;
pub mod invariants;

pub use entity::AnimeFolder;
pub use invariants::{validate_anime_folder, validate_folder_name};
