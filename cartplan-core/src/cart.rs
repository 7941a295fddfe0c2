//! Cartridges: the finite pool of fibre-plug units.

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::plate::PlateId;
use crate::window::Survey;

pub type CartId = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartCategory {
    Manga,
    Apogee,
    /// MaNGA cart held back from the nightly science pool.
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub category: CartCategory,
    pub available: bool,
    /// Plate currently plugged.
    pub plate: Option<PlateId>,
}

impl Cart {
    pub fn new(id: CartId, category: CartCategory) -> Self {
        Self {
            id,
            category,
            available: true,
            plate: None,
        }
    }

    pub fn with_plate(mut self, plate: PlateId) -> Self {
        self.plate = Some(plate);
        self
    }

    /// Whether the cart can hold a MaNGA plate.
    pub fn takes_manga(&self) -> bool {
        matches!(self.category, CartCategory::Manga | CartCategory::Offline)
    }
}

/// Builds the cart pool from the configured memberships, all empty and available.
pub fn carts_from_config(cfg: &SchedulerConfig) -> Vec<Cart> {
    let mut carts: Vec<Cart> = cfg
        .manga_carts
        .iter()
        .map(|&id| {
            let category = if cfg.offline_carts.contains(&id) {
                CartCategory::Offline
            } else {
                CartCategory::Manga
            };
            Cart::new(id, category)
        })
        .chain(
            cfg.apogee_carts
                .iter()
                .map(|&id| Cart::new(id, CartCategory::Apogee)),
        )
        .collect();
    carts.sort_by_key(|c| c.id);
    carts
}

/// Order in which carts are offered for plugging on a night.
///
/// Non-MaNGA nights use offline carts first to keep the MaNGA carts free. On
/// MaNGA nights carts holding a plate with an incomplete set come first, with
/// offline carts right behind them.
pub fn cart_order(
    carts: &[Cart],
    survey: Survey,
    holds_incomplete_set: impl Fn(PlateId) -> bool,
) -> Vec<Cart> {
    let rank = |c: &Cart| -> u8 {
        match survey {
            Survey::Apogee => match c.category {
                CartCategory::Offline => 0,
                CartCategory::Apogee => 1,
                CartCategory::Manga => 2,
            },
            Survey::Manga => {
                if c.takes_manga() && c.plate.is_some_and(&holds_incomplete_set) {
                    return 0;
                }
                match c.category {
                    CartCategory::Offline => 1,
                    CartCategory::Manga => 2,
                    CartCategory::Apogee => 3,
                }
            }
        }
    };

    let mut ordered: Vec<Cart> = carts.to_vec();
    // rank asc, then cart id asc
    ordered.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.id.cmp(&b.id)));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<Cart> {
        vec![
            Cart::new(1, CartCategory::Manga),
            Cart::new(2, CartCategory::Manga).with_plate(9001),
            Cart::new(3, CartCategory::Offline),
            Cart::new(9, CartCategory::Apogee),
        ]
    }

    #[test]
    fn test_carts_from_config() {
        let cfg = SchedulerConfig::default();
        let carts = carts_from_config(&cfg);
        assert_eq!(carts.len(), 11);
        assert_eq!(carts[6].category, CartCategory::Offline);
        assert_eq!(carts[8].category, CartCategory::Apogee);
        assert!(carts.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_order_non_manga_night_prefers_offline() {
        let ids: Vec<CartId> = cart_order(&pool(), Survey::Apogee, |_| true)
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![3, 9, 1, 2]);
    }

    #[test]
    fn test_order_manga_night_incomplete_set_first() {
        let ids: Vec<CartId> = cart_order(&pool(), Survey::Manga, |p| p == 9001)
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![2, 3, 1, 9]);

        // without an incomplete set the holding cart is an ordinary MaNGA cart
        let ids: Vec<CartId> = cart_order(&pool(), Survey::Manga, |_| false)
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![3, 1, 2, 9]);
    }
}
