//! Product listing filters.
//!
//! Listing requests carry free-form query parameters. `ProductQuery::from_params`
//! turns them into a typed filter, which is then either rendered into a parameterized
//! `WHERE` clause (`push_conditions`) or evaluated against products in memory
//! (`matches`). Both paths implement the same predicate:
//!
//! * every present criterion is ANDed,
//! * within a tag group the values are ORed, groups are ANDed,
//! * price ranges are ORed.

use std::collections::{BTreeMap, HashMap};

use sqlx::{Postgres, QueryBuilder};
use thiserror::Error;

use crate::models::Product;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

pub const FILTER_KIND_TAG: &str = "tag";
pub const FILTER_KIND_PRICE: &str = "price";

/// Parameters with a fixed meaning. Every other parameter is a tag group.
const RESERVED_PARAMS: &[&str] = &[
    "search",
    "category",
    "price",
    "min_price",
    "max_price",
    "tags",
    "in_stock",
    "sort",
    "page",
    "limit",
];

/// Group key for tags without a `key:` prefix.
const PLAIN_TAG_GROUP: &str = "";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid value '{value}' for parameter '{param}'")]
    InvalidNumber { param: String, value: String },
    #[error("invalid price range '{0}'")]
    InvalidPriceRange(String),
    #[error("unknown sort order '{0}'")]
    InvalidSort(String),
    #[error("'{param}' must be between {min} and {max}")]
    OutOfBounds { param: String, min: i64, max: i64 },
}

/// PriceRange
///
/// Inclusive bounds in cents. A missing bound is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriceRange {
    pub min_cents: Option<i64>,
    pub max_cents: Option<i64>,
}

impl PriceRange {
    /// Parses `a-b`, `a+`, `a-` and `-b`, amounts in currency units.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let raw = raw.trim();
        let invalid = || QueryError::InvalidPriceRange(raw.to_string());

        if let Some(min) = raw.strip_suffix('+') {
            return Ok(Self {
                min_cents: Some(parse_amount(min).ok_or_else(invalid)?),
                max_cents: None,
            });
        }

        let (low, high) = raw.split_once('-').ok_or_else(invalid)?;
        let (low, high) = (low.trim(), high.trim());
        let range = match (low.is_empty(), high.is_empty()) {
            (true, true) => return Err(invalid()),
            (true, false) => Self {
                min_cents: None,
                max_cents: Some(parse_amount(high).ok_or_else(invalid)?),
            },
            (false, true) => Self {
                min_cents: Some(parse_amount(low).ok_or_else(invalid)?),
                max_cents: None,
            },
            (false, false) => Self {
                min_cents: Some(parse_amount(low).ok_or_else(invalid)?),
                max_cents: Some(parse_amount(high).ok_or_else(invalid)?),
            },
        };

        if range.is_empty() {
            return Err(invalid());
        }
        Ok(range)
    }

    fn is_empty(&self) -> bool {
        matches!((self.min_cents, self.max_cents), (Some(min), Some(max)) if min > max)
    }

    /// Narrows this range by an outer bound. The result may be empty.
    fn intersect(self, outer: PriceRange) -> PriceRange {
        PriceRange {
            min_cents: max_opt(self.min_cents, outer.min_cents),
            max_cents: min_opt(self.max_cents, outer.max_cents),
        }
    }

    pub fn contains(&self, cents: i64) -> bool {
        self.min_cents.is_none_or(|min| cents >= min) && self.max_cents.is_none_or(|max| cents <= max)
    }
}

fn max_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn min_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Parses a non-negative amount with at most two decimals into cents.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (raw, ""),
    };

    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if fraction.len() > 2 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = whole.parse().ok()?;
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(fraction)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Rating,
    Name,
}

impl SortOrder {
    fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw {
            "newest" => Ok(Self::Newest),
            "price_asc" => Ok(Self::PriceAsc),
            "price_desc" => Ok(Self::PriceDesc),
            "rating" => Ok(Self::Rating),
            "name" => Ok(Self::Name),
            other => Err(QueryError::InvalidSort(other.to_string())),
        }
    }

    fn order_by(self) -> &'static str {
        match self {
            Self::Newest => " ORDER BY p.created_at DESC, p.id",
            Self::PriceAsc => " ORDER BY p.price_cents ASC, p.id",
            Self::PriceDesc => " ORDER BY p.price_cents DESC, p.id",
            Self::Rating => " ORDER BY p.rating_avg DESC, p.rating_count DESC, p.id",
            Self::Name => " ORDER BY p.name ASC, p.id",
        }
    }
}

/// Lower-cases a tag and trims around its `key:value` separator.
pub fn normalize_tag(raw: &str) -> String {
    match raw.split_once(':') {
        Some((key, value)) => format!(
            "{}:{}",
            key.trim().to_lowercase(),
            value.trim().to_lowercase()
        ),
        None => raw.trim().to_lowercase(),
    }
}

/// Splits a comma-separated parameter into trimmed, lower-cased, non-empty values.
fn split_values(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
}

/// ProductQuery
///
/// A parsed product listing request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProductQuery {
    pub search: Option<String>,
    /// Category slugs, ORed.
    pub categories: Vec<String>,
    /// ORed price ranges.
    pub price_ranges: Vec<PriceRange>,
    /// Group key -> full tag strings (`key:value`, or the bare tag for the plain group).
    pub tag_groups: BTreeMap<String, Vec<String>>,
    pub in_stock: Option<bool>,
    /// Set by the admin listing; never from request parameters.
    pub include_inactive: bool,
    pub sort: SortOrder,
    pub page: i64,
    pub limit: i64,
}

impl ProductQuery {
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, QueryError> {
        let mut query = ProductQuery {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            ..ProductQuery::default()
        };

        if let Some(search) = params.get("search").map(|s| s.trim()).filter(|s| !s.is_empty()) {
            query.search = Some(search.to_lowercase());
        }

        if let Some(raw) = params.get("category") {
            for slug in split_values(raw) {
                if !query.categories.contains(&slug) {
                    query.categories.push(slug);
                }
            }
        }

        if let Some(raw) = params.get("price") {
            for range in raw.split(',').filter(|r| !r.trim().is_empty()) {
                query.price_ranges.push(PriceRange::parse(range)?);
            }
        }

        let outer = PriceRange {
            min_cents: parse_price_param(params, "min_price")?,
            max_cents: parse_price_param(params, "max_price")?,
        };
        if outer.is_empty() {
            return Err(QueryError::InvalidPriceRange(format!(
                "min_price {} exceeds max_price {}",
                params.get("min_price").map_or("", String::as_str),
                params.get("max_price").map_or("", String::as_str)
            )));
        }
        if outer != PriceRange::default() {
            if query.price_ranges.is_empty() {
                query.price_ranges.push(outer);
            } else {
                query.price_ranges = query
                    .price_ranges
                    .iter()
                    .map(|range| range.intersect(outer))
                    .collect();
            }
        }

        if let Some(raw) = params.get("tags") {
            for tag in raw.split(',').map(normalize_tag).filter(|t| !t.is_empty()) {
                let group = match tag.split_once(':') {
                    // `:foo` and `foo:` name no facet.
                    Some((key, value)) if key.is_empty() || value.is_empty() => continue,
                    Some((key, _)) => key.to_string(),
                    None => PLAIN_TAG_GROUP.to_string(),
                };
                query.add_tag(group, tag);
            }
        }

        // Free-form facet parameters: `brand=acme,globex` is the tag group "brand".
        for (key, raw) in params {
            let key = key.trim().to_lowercase();
            if key.is_empty() || RESERVED_PARAMS.contains(&key.as_str()) {
                continue;
            }
            for value in split_values(raw) {
                let tag = format!("{key}:{value}");
                query.add_tag(key.clone(), tag);
            }
        }

        if let Some(raw) = params.get("in_stock") {
            query.in_stock = match raw.trim().to_lowercase().as_str() {
                "" => None,
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => {
                    return Err(QueryError::InvalidNumber {
                        param: "in_stock".into(),
                        value: raw.clone(),
                    });
                }
            };
        }

        if let Some(raw) = params.get("sort").map(|s| s.trim()).filter(|s| !s.is_empty()) {
            query.sort = SortOrder::parse(&raw.to_lowercase())?;
        }

        if let Some(page) = parse_int_param(params, "page")? {
            if page < 1 {
                return Err(QueryError::OutOfBounds {
                    param: "page".into(),
                    min: 1,
                    max: i64::MAX,
                });
            }
            query.page = page;
        }

        if let Some(limit) = parse_int_param(params, "limit")? {
            if !(1..=MAX_PAGE_SIZE).contains(&limit) {
                return Err(QueryError::OutOfBounds {
                    param: "limit".into(),
                    min: 1,
                    max: MAX_PAGE_SIZE,
                });
            }
            query.limit = limit;
        }

        Ok(query)
    }

    fn add_tag(&mut self, group: String, tag: String) {
        let values = self.tag_groups.entry(group).or_default();
        if !values.contains(&tag) {
            values.push(tag);
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    /// Appends the `WHERE` clause for this query. Expects the products table aliased `p`.
    pub fn push_conditions(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        builder.push(" WHERE TRUE");

        if !self.include_inactive {
            builder.push(" AND p.is_active = TRUE");
        }

        if let Some(search) = &self.search {
            let pattern = format!("%{}%", escape_like(search));
            builder.push(" AND (p.name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR p.description ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }

        if !self.categories.is_empty() {
            builder.push(" AND p.category_id IN (SELECT c.id FROM categories c WHERE c.slug = ANY(");
            builder.push_bind(self.categories.clone());
            builder.push("))");
        }

        if !self.price_ranges.is_empty() {
            builder.push(" AND (");
            for (i, range) in self.price_ranges.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                builder.push("(TRUE");
                if let Some(min) = range.min_cents {
                    builder.push(" AND p.price_cents >= ");
                    builder.push_bind(min);
                }
                if let Some(max) = range.max_cents {
                    builder.push(" AND p.price_cents <= ");
                    builder.push_bind(max);
                }
                builder.push(")");
            }
            builder.push(")");
        }

        for tags in self.tag_groups.values() {
            // Array overlap: the product carries at least one tag of the group.
            builder.push(" AND p.tags && ");
            builder.push_bind(tags.clone());
        }

        match self.in_stock {
            Some(true) => {
                builder.push(" AND p.stock > 0");
            }
            Some(false) => {
                builder.push(" AND p.stock <= 0");
            }
            None => {}
        }
    }

    /// Appends `ORDER BY`, `LIMIT` and `OFFSET`.
    pub fn push_ordering(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        builder.push(self.sort.order_by());
        builder.push(" LIMIT ");
        builder.push_bind(self.limit);
        builder.push(" OFFSET ");
        builder.push_bind(self.offset());
    }

    /// In-memory evaluation of the same predicate `push_conditions` renders.
    pub fn matches(&self, product: &Product, category_slug: Option<&str>) -> bool {
        if !self.include_inactive && !product.is_active {
            return false;
        }

        if let Some(search) = &self.search {
            let in_name = product.name.to_lowercase().contains(search.as_str());
            let in_description = product.description.to_lowercase().contains(search.as_str());
            if !in_name && !in_description {
                return false;
            }
        }

        if !self.categories.is_empty()
            && !category_slug.is_some_and(|slug| self.categories.iter().any(|c| c == slug))
        {
            return false;
        }

        if !self.price_ranges.is_empty()
            && !self
                .price_ranges
                .iter()
                .any(|range| range.contains(product.price_cents))
        {
            return false;
        }

        let all_groups_hit = self
            .tag_groups
            .values()
            .all(|tags| product.tags.iter().any(|tag| tags.contains(tag)));
        if !all_groups_hit {
            return false;
        }

        match self.in_stock {
            Some(true) => product.stock > 0,
            Some(false) => product.stock <= 0,
            None => true,
        }
    }

    /// In-memory ordering equivalent to `push_ordering`'s `ORDER BY`.
    pub fn sort_products(&self, products: &mut [Product]) {
        match self.sort {
            SortOrder::Newest => {
                products.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)))
            }
            SortOrder::PriceAsc => {
                products.sort_by(|a, b| a.price_cents.cmp(&b.price_cents).then(a.id.cmp(&b.id)))
            }
            SortOrder::PriceDesc => {
                products.sort_by(|a, b| b.price_cents.cmp(&a.price_cents).then(a.id.cmp(&b.id)))
            }
            SortOrder::Rating => products.sort_by(|a, b| {
                b.rating_avg
                    .total_cmp(&a.rating_avg)
                    .then(b.rating_count.cmp(&a.rating_count))
                    .then(a.id.cmp(&b.id))
            }),
            SortOrder::Name => products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
        }
    }
}

fn parse_int_param(params: &HashMap<String, String>, name: &str) -> Result<Option<i64>, QueryError> {
    match params.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| QueryError::InvalidNumber {
                param: name.to_string(),
                value: raw.to_string(),
            }),
    }
}

fn parse_price_param(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<Option<i64>, QueryError> {
    match params.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_amount(raw)
            .map(Some)
            .ok_or_else(|| QueryError::InvalidNumber {
                param: name.to_string(),
                value: raw.to_string(),
            }),
    }
}

/// Escapes `LIKE` wildcards so the search term matches literally.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Checks an admin facet definition.
pub fn validate_filter_definition(kind: &str, key: &str, options: &[String]) -> Result<(), String> {
    if key.trim().is_empty() || key.contains([':', ',']) {
        return Err("filter key must be non-empty and contain no ':' or ','".to_string());
    }
    if RESERVED_PARAMS.contains(&key) && kind == FILTER_KIND_TAG {
        return Err(format!("'{key}' is a reserved listing parameter"));
    }
    match kind {
        FILTER_KIND_TAG => Ok(()),
        FILTER_KIND_PRICE => options
            .iter()
            .try_for_each(|option| PriceRange::parse(option).map(|_| ()))
            .map_err(|e| e.to_string()),
        other => Err(format!("unsupported filter kind '{other}'")),
    }
}
