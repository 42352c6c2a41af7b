//! # Product Types
//!
//! Product catalog types for litecart.
//! Products are loaded from `config/products.toml` and are the only
//! source of prices when a cart is priced.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    JPY,
    CAD,
    AUD,
    CHF,
    MXN,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
            Currency::CAD => "CAD",
            Currency::AUD => "AUD",
            Currency::CHF => "CHF",
            Currency::MXN => "MXN",
        }
    }

    /// Returns the number of decimal places for this currency
    /// (JPY has 0 decimals, most others have 2)
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Render an amount in minor units as a major-unit decimal string
    /// (`2200` USD -> `"22.00"`).
    pub fn format_minor(&self, amount: i64) -> String {
        let places = self.decimal_places();
        if places == 0 {
            return amount.to_string();
        }
        let divisor = 10_i64.pow(places);
        let sign = if amount < 0 { "-" } else { "" };
        let abs = amount.unsigned_abs();
        let divisor = divisor as u64;
        format!(
            "{}{}.{:0width$}",
            sign,
            abs / divisor,
            abs % divisor,
            width = places as usize
        )
    }

    /// Parse a major-unit decimal string into minor units (`"22.00"` USD -> `2200`).
    /// More fractional digits than the currency allows is rejected.
    pub fn parse_minor(&self, value: &str) -> Option<i64> {
        let places = self.decimal_places() as usize;
        let value = value.trim();
        let (whole, frac) = value.split_once('.').unwrap_or((value, ""));
        if frac.len() > places || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        format!("{}{:0<width$}", whole, frac, width = places)
            .parse()
            .ok()
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::USD
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "JPY" => Ok(Currency::JPY),
            "CAD" => Ok(Currency::CAD),
            "AUD" => Ok(Currency::AUD),
            "CHF" => Ok(Currency::CHF),
            "MXN" => Ok(Currency::MXN),
            other => Err(format!("unsupported currency: {}", other)),
        }
    }
}

/// Price with amount in smallest currency unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in smallest currency unit (cents for USD)
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Price {
    /// Create a price from smallest unit (cents)
    pub fn from_cents(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Format for display (e.g., "10.00 USD")
    pub fn display(&self) -> String {
        format!("{} {}", self.currency.format_minor(self.amount), self.currency)
    }
}

/// Product type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    /// Digital download delivered after payment
    Digital,
    /// Physical goods shipped after payment
    Physical,
}

impl Default for ProductType {
    fn default() -> Self {
        ProductType::Digital
    }
}

/// A product in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Unique product identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Short description
    #[serde(default)]
    pub description: String,

    /// Product type
    #[serde(default)]
    pub product_type: ProductType,

    /// Current catalog price
    pub price: Price,

    /// Whether this product is active and available for purchase
    #[serde(default = "default_true")]
    pub active: bool,

    /// Optional image URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: Price) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            product_type: ProductType::Digital,
            price,
            active: true,
            image_url: None,
        }
    }

    /// Builder: set description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: set image URL
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Builder: mark product unavailable
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Product catalog (loaded from config)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductCatalog {
    #[serde(default)]
    pub products: Vec<Product>,
}

impl ProductCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            products: Vec::new(),
        }
    }

    /// Add a product to the catalog
    pub fn add(&mut self, product: Product) {
        self.products.push(product);
    }

    /// Builder: add a product
    pub fn with_product(mut self, product: Product) -> Self {
        self.add(product);
        self
    }

    /// Find a product by ID
    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    /// Get all active products
    pub fn active_products(&self) -> impl Iterator<Item = &Product> {
        self.products.iter().filter(|p| p.active)
    }

    /// Load catalog from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}
