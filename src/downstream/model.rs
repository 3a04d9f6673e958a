use serde::{Deserialize, Serialize};

/// Entities addressable by a string id
pub trait Keyed {
    /// The entity's id
    fn key(&self) -> &str;
}

/// User entity served by the users upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl Keyed for User {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Product entity served by the products upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub owner: User,
}

impl Keyed for Product {
    fn key(&self) -> &str {
        &self.id
    }
}
