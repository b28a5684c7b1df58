use crate::models::{Element, SearchResult};

#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub element: Element,
    pub vector: Vec<f32>,
}

impl VectorEntry {
    pub fn id(&self) -> &str {
        &self.element.id
    }
}

#[derive(Debug, Clone)]
pub struct StoreHit {
    pub element: Element,
    pub score: f64,
}

impl StoreHit {
    pub fn into_result(self) -> SearchResult {
        SearchResult {
            element: self.element,
            score: self.score,
        }
    }
}
