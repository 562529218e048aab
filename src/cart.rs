// Cart data model and the pure reconciliation rules applied by the synchronizer

use serde::{Deserialize, Serialize};

// Something that can be put in the cart (a hotel room offer, typically)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub image: Option<String>,
    pub quantity: u32,
}

impl CartLine {
    pub fn subtotal(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

// Lines are keyed by product id; a line never has quantity 0.
// Serialized as a plain JSON array, which is the shape kept in both stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    // Builds a cart from stored lines, merging duplicates and dropping empty lines
    pub fn from_lines(lines: Vec<CartLine>) -> Self {
        let mut cart = Cart::new();
        for line in lines {
            if line.quantity == 0 {
                continue;
            }
            match cart.lines.iter_mut().find(|l| l.id == line.id) {
                Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
                None => cart.lines.push(line),
            }
        }
        cart
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn get(&self, id: &str) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn item_count(&self) -> u64 {
        self.lines.iter().map(|l| l.quantity as u64).sum()
    }

    pub fn total(&self) -> f64 {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    // Increments an existing line or appends a new one. Adding zero is a no-op.
    pub fn add(&mut self, product: &Product, qty: u32) {
        if qty == 0 {
            return;
        }
        if let Some(line) = self.lines.iter_mut().find(|l| l.id == product.id) {
            line.quantity = line.quantity.saturating_add(qty);
            return;
        }
        self.lines.push(CartLine {
            id: product.id.clone(),
            title: product.title.clone(),
            price: product.price,
            image: product.image.clone(),
            quantity: qty,
        });
    }

    // Negative quantities clamp to 0, and 0 removes the line
    pub fn set_quantity(&mut self, id: &str, qty: i64) {
        let qty = u32::try_from(qty.max(0)).unwrap_or(u32::MAX);
        if qty == 0 {
            self.remove(id);
            return;
        }
        if let Some(line) = self.lines.iter_mut().find(|l| l.id == id) {
            line.quantity = qty;
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.id != id);
        self.lines.len() != before
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;
    use test_case::test_case;

    fn product(id: &str) -> Product {
        Product {
            id: id.to_string(),
            title: format!("Room {}", id),
            price: 120.0,
            image: None,
        }
    }

    #[test]
    fn test_add_same_product_twice_merges_quantity() {
        let mut cart = Cart::new();
        cart.add(&product("P"), 2);
        cart.add(&product("P"), 3);

        assert_eq!(cart.len(), 1);
        assert_eq!(cart.get("P").unwrap().quantity, 5);
    }

    #[test]
    fn test_set_quantity_zero_removes_line() {
        let mut cart = Cart::new();
        cart.add(&product("P"), 1);
        cart.set_quantity("P", 0);
        assert!(cart.get("P").is_none());
        assert!(cart.is_empty());
    }

    #[test_case(-5, None ; "negative clamps to zero and removes")]
    #[test_case(0, None ; "zero removes")]
    #[test_case(1, Some(1) ; "one keeps the line")]
    #[test_case(7, Some(7) ; "larger value is stored")]
    fn test_set_quantity_clamping(qty: i64, expected: Option<u32>) {
        let mut cart = Cart::new();
        cart.add(&product("P"), 3);
        cart.set_quantity("P", qty);
        assert_eq!(cart.get("P").map(|l| l.quantity), expected);
    }

    #[test]
    fn test_set_quantity_for_unknown_id_is_noop() {
        let mut cart = Cart::new();
        cart.add(&product("A"), 1);
        cart.set_quantity("B", 4);
        assert_eq!(cart.len(), 1);
        assert!(cart.get("B").is_none());
    }

    #[test]
    fn test_add_zero_is_noop() {
        let mut cart = Cart::new();
        cart.add(&product("A"), 0);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut cart = Cart::new();
        cart.add(&product("A"), 1);
        assert!(!cart.remove("B"));
        assert!(cart.remove("A"));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_totals() {
        let mut cart = Cart::new();
        cart.add(&product("A"), 2);
        cart.add(
            &Product {
                id: "B".to_string(),
                title: "Suite".to_string(),
                price: 50.5,
                image: Some("https://img/b.jpg".to_string()),
            },
            1,
        );
        assert_eq!(cart.item_count(), 3);
        assert!((cart.total() - 290.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_json_shape_is_plain_array() {
        let mut cart = Cart::new();
        cart.add(&product("42"), 1);
        let json = serde_json::to_value(&cart).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["id"], "42");
        assert_eq!(json[0]["quantity"], 1);

        let minimal: Cart = serde_json::from_str(r#"[{"id":"42","quantity":1}]"#).unwrap();
        assert_eq!(minimal.get("42").unwrap().quantity, 1);
        assert_eq!(minimal.get("42").unwrap().title, "");
    }

    #[test]
    fn test_from_lines_normalizes() {
        let line = |id: &str, quantity: u32| CartLine {
            id: id.to_string(),
            title: String::new(),
            price: 10.0,
            image: None,
            quantity,
        };
        let cart = Cart::from_lines(vec![line("A", 1), line("B", 0), line("A", 2)]);
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.get("A").unwrap().quantity, 3);
    }

    // Random operation sequences must never produce an empty line or a duplicate id
    #[test]
    fn test_random_operations_preserve_invariants() {
        let mut rng = rand::thread_rng();
        let ids = ["a", "b", "c", "d"];
        let mut cart = Cart::new();

        for _ in 0..5000 {
            let id = ids[rng.gen_range(0..ids.len())];
            match rng.gen_range(0..3) {
                0 => cart.add(&product(id), rng.gen_range(0..4)),
                1 => cart.set_quantity(id, rng.gen_range(-3..5)),
                _ => {
                    cart.remove(id);
                }
            }

            let mut seen = HashSet::new();
            for line in cart.lines() {
                assert!(line.quantity > 0, "line {} has quantity 0", line.id);
                assert!(seen.insert(line.id.clone()), "duplicate line {}", line.id);
            }
        }
    }
}
