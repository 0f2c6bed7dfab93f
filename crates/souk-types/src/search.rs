//! In-memory filtering and ordering of an already-fetched page of ads.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::Ad;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// VIP ads first, newest first within each group.
    #[default]
    VipFirst,
    Newest,
    PriceAsc,
    PriceDesc,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchFilter {
    /// Free text, matched against title, description and location.
    pub q: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub vip: Option<bool>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub sort: SortOrder,
}

impl SearchFilter {
    fn needle(&self) -> Option<String> {
        self.q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase)
    }

    fn matches(&self, ad: &Ad, needle: Option<&str>, now: DateTime<Utc>) -> bool {
        if let Some(needle) = needle {
            let hit = [&ad.title, &ad.description, &ad.location]
                .iter()
                .any(|field| field.to_lowercase().contains(needle));
            if !hit {
                return false;
            }
        }

        if !eq_opt(self.category.as_deref(), &ad.category) {
            return false;
        }
        if !eq_opt(self.location.as_deref(), &ad.location) {
            return false;
        }

        if let Some(vip) = self.vip {
            if ad.is_vip(now) != vip {
                return false;
            }
        }

        if self.min_price.is_some() || self.max_price.is_some() {
            let Some(price) = ad.price else {
                return false;
            };
            if self.min_price.is_some_and(|min| price < min) {
                return false;
            }
            if self.max_price.is_some_and(|max| price > max) {
                return false;
            }
        }

        true
    }
}

/// Comparison key for category and location equality. Full Unicode case
/// folding, so "Ébolowa" and "ébolowa" share a key. The database stores the
/// same key next to each ad.
pub fn match_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Blank filter values are treated as unset.
fn eq_opt(wanted: Option<&str>, actual: &str) -> bool {
    match wanted.map(str::trim).filter(|w| !w.is_empty()) {
        Some(w) => match_key(w) == match_key(actual),
        None => true,
    }
}

/// Applies every predicate of `filter`, then orders the survivors.
pub fn apply(ads: Vec<Ad>, filter: &SearchFilter, now: DateTime<Utc>) -> Vec<Ad> {
    let needle = filter.needle();
    let mut out: Vec<Ad> = ads
        .into_iter()
        .filter(|ad| filter.matches(ad, needle.as_deref(), now))
        .collect();
    sort(&mut out, filter.sort, now);
    out
}

pub fn sort(ads: &mut [Ad], order: SortOrder, now: DateTime<Utc>) {
    match order {
        SortOrder::VipFirst => ads.sort_by(|a, b| {
            b.is_vip(now)
                .cmp(&a.is_vip(now))
                .then_with(|| b.created_at.cmp(&a.created_at))
        }),
        SortOrder::Newest => ads.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortOrder::PriceAsc => ads.sort_by(|a, b| by_price(a.price, b.price, false)),
        SortOrder::PriceDesc => ads.sort_by(|a, b| by_price(a.price, b.price, true)),
    }
}

// Unpriced ads sink to the bottom in both directions.
fn by_price(a: Option<i64>, b: Option<i64>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) if descending => y.cmp(&x),
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AdStatus;
    use crate::moderation::ModerationStatus;
    use chrono::Duration;
    use uuid::Uuid;

    fn ad(title: &str, price: Option<i64>) -> Ad {
        let now = Utc::now();
        Ad {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            category: "services".into(),
            location: "Yaoundé".into(),
            price,
            images: vec![],
            status: AdStatus::Active,
            moderation_status: ModerationStatus::Approved,
            moderated_at: None,
            moderated_by: None,
            moderation_notes: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn titles(ads: &[Ad]) -> Vec<&str> {
        ads.iter().map(|a| a.title.as_str()).collect()
    }

    #[test]
    fn query_matches_title_case_insensitively() {
        let ads = vec![ad("Massage relax", Some(5000)), ad("Rencontre", Some(10000))];
        let filter = SearchFilter { q: Some("mass".into()), ..Default::default() };
        let out = apply(ads, &filter, Utc::now());
        assert_eq!(titles(&out), ["Massage relax"]);
    }

    #[test]
    fn query_also_searches_description_and_location() {
        let mut a = ad("Studio", None);
        a.description = "Proche du MARCHÉ central".into();
        let mut b = ad("Chambre", None);
        b.location = "Bonamoussadi".into();
        let c = ad("Voiture", None);

        let now = Utc::now();
        let by_desc = SearchFilter { q: Some("marché".into()), ..Default::default() };
        assert_eq!(titles(&apply(vec![a.clone(), b.clone(), c.clone()], &by_desc, now)), ["Studio"]);

        let by_loc = SearchFilter { q: Some("  bonamou ".into()), ..Default::default() };
        assert_eq!(titles(&apply(vec![a, b, c], &by_loc, now)), ["Chambre"]);
    }

    #[test]
    fn every_result_contains_the_query() {
        let ads = vec![
            ad("Iphone 12", Some(150_000)),
            ad("Samsung", Some(90_000)),
            ad("iPhone chargeur", Some(5_000)),
            ad("Table", None),
        ];
        let filter = SearchFilter { q: Some("IPHONE".into()), ..Default::default() };
        let out = apply(ads, &filter, Utc::now());
        assert_eq!(out.len(), 2);
        for a in &out {
            let hay = format!("{} {} {}", a.title, a.description, a.location).to_lowercase();
            assert!(hay.contains("iphone"));
        }
    }

    #[test]
    fn category_and_location_are_exact_matches() {
        let mut a = ad("A", None);
        a.category = "Immobilier".into();
        a.location = "Douala".into();
        let mut b = ad("B", None);
        b.category = "Immobilier neuf".into();
        b.location = "Douala".into();

        let filter = SearchFilter {
            category: Some("immobilier".into()),
            location: Some("DOUALA".into()),
            ..Default::default()
        };
        assert_eq!(titles(&apply(vec![a, b], &filter, Utc::now())), ["A"]);
    }

    #[test]
    fn match_key_folds_accented_capitals() {
        assert_eq!(match_key(" Ébolowa "), "ébolowa");
        assert_eq!(match_key("ÉLECTRONIQUE"), match_key("électronique"));
        assert_ne!(match_key("Yaoundé"), match_key("Yaounde"));
    }

    #[test]
    fn price_bounds_are_inclusive_and_drop_unpriced() {
        let ads = vec![
            ad("cheap", Some(1_000)),
            ad("low", Some(5_000)),
            ad("high", Some(10_000)),
            ad("ask", None),
        ];
        let filter = SearchFilter {
            min_price: Some(5_000),
            max_price: Some(10_000),
            sort: SortOrder::PriceAsc,
            ..Default::default()
        };
        assert_eq!(titles(&apply(ads, &filter, Utc::now())), ["low", "high"]);
    }

    #[test]
    fn vip_filter_uses_window_against_now() {
        let now = Utc::now();
        let mut vip = ad("vip", None);
        vip.expires_at = Some(now + Duration::days(3));
        let mut lapsed = ad("lapsed", None);
        lapsed.expires_at = Some(now - Duration::hours(1));
        let plain = ad("plain", None);

        let only_vip = SearchFilter { vip: Some(true), ..Default::default() };
        assert_eq!(
            titles(&apply(vec![vip.clone(), lapsed.clone(), plain.clone()], &only_vip, now)),
            ["vip"]
        );

        let no_vip = SearchFilter { vip: Some(false), sort: SortOrder::Newest, ..Default::default() };
        let out = apply(vec![vip, lapsed, plain], &no_vip, now);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|a| !a.is_vip(now)));
    }

    #[test]
    fn default_order_puts_vip_first_then_newest() {
        let now = Utc::now();
        let mut old_vip = ad("old vip", None);
        old_vip.created_at = now - Duration::days(10);
        old_vip.expires_at = Some(now + Duration::days(1));
        let mut newest = ad("newest", None);
        newest.created_at = now;
        let mut older = ad("older", None);
        older.created_at = now - Duration::days(2);

        let out = apply(vec![older, newest, old_vip], &SearchFilter::default(), now);
        assert_eq!(titles(&out), ["old vip", "newest", "older"]);
    }

    #[test]
    fn price_desc_keeps_unpriced_last() {
        let ads = vec![ad("ask", None), ad("a", Some(10)), ad("b", Some(30))];
        let filter = SearchFilter { sort: SortOrder::PriceDesc, ..Default::default() };
        assert_eq!(titles(&apply(ads, &filter, Utc::now())), ["b", "a", "ask"]);
    }

    #[test]
    fn blank_filters_are_ignored() {
        let ads = vec![ad("x", None), ad("y", None)];
        let filter = SearchFilter {
            q: Some("   ".into()),
            category: Some("".into()),
            ..Default::default()
        };
        assert_eq!(apply(ads, &filter, Utc::now()).len(), 2);
    }
}
