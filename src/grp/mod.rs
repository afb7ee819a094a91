pub mod elbow;
pub mod embeddings;
pub mod io;
pub mod kmeans;
pub mod model;
pub mod normalize;
pub mod oracle;
pub mod pipeline;
pub mod summary;
