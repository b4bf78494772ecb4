pub mod preprocess;

pub use preprocess::{ImageSettings, PartitionResult, partition_image, views_to_tensor};
