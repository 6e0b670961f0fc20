mod features;
mod gmm;
mod kmeans;

pub use features::{appearance_feature, cone_feature, rgb_to_hsv, FeatureImage, Hsv};
pub use gmm::{ColorAppearanceModel, CostImage, GaussianComponent, Mixture, ProbabilityImage, EPSILON};
pub use kmeans::{Clustering, KMeans};
