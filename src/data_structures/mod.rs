pub mod instance;
pub mod model;
pub mod scene_graph;
pub mod texture;
