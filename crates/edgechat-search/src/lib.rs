mod augmenter;
mod prompts;
mod tavily;

pub use augmenter::{Augmentation, SearchAugmenter};
pub use tavily::{SearchProvider, SearchRequest, SearchResponse, SearchResult, TavilyClient};
