use std::collections::HashSet;

use crate::error::AppResult;

/// Tables whose rows carry a unique slug.
#[derive(Debug, Clone, Copy)]
pub enum SlugTable {
    Challenges,
    Badges,
    ShopItems,
}

impl SlugTable {
    fn name(self) -> &'static str {
        match self {
            SlugTable::Challenges => "challenges",
            SlugTable::Badges => "badges",
            SlugTable::ShopItems => "shop_items",
        }
    }

    /// Slugs that collide with static routes next to `/:slug`.
    fn reserved(self) -> &'static [&'static str] {
        match self {
            SlugTable::Challenges => &["me", "progress"],
            SlugTable::Badges | SlugTable::ShopItems => &[],
        }
    }
}

const MAX_SLUG_LEN: usize = 200;

/// Lowercase ASCII slug: alphanumerics kept, every other run collapsed to
/// a single `-`, no leading or trailing dash.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    if slug.is_empty() {
        slug.push_str("item");
    }
    slug
}

/// First of `base`, `base-1`, `base-2`, ... not in `taken`.
pub fn first_free_slug(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut counter = 1u32;
    loop {
        let candidate = format!("{base}-{counter}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Unique slug for `title` in `table`. `exclude_id` is the row being
/// updated, so it can keep its own slug.
pub async fn unique_slug<'e, E>(
    executor: E,
    table: SlugTable,
    title: &str,
    exclude_id: Option<i32>,
) -> AppResult<String>
where
    E: sqlx::PgExecutor<'e>,
{
    let base = slugify(title);
    let sql = format!(
        "SELECT slug FROM {} WHERE (slug = $1 OR slug LIKE $2) AND ($3::int IS NULL OR id <> $3)",
        table.name()
    );
    let taken: Vec<String> = sqlx::query_scalar(&sql)
        .bind(&base)
        .bind(format!("{base}-%"))
        .bind(exclude_id)
        .fetch_all(executor)
        .await?;
    Ok(free_slug(table, &base, taken))
}

/// Picks the slug for `base` given the slugs already stored in `table`.
fn free_slug(table: SlugTable, base: &str, stored: Vec<String>) -> String {
    let mut taken: HashSet<String> = stored.into_iter().collect();
    taken.extend(table.reserved().iter().map(|s| s.to_string()));
    first_free_slug(base, &taken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Watch 5 Horror Movies!"), "watch-5-horror-movies");
        assert_eq!(slugify("  --Read   the Classics-- "), "read-the-classics");
        assert_eq!(slugify("Été du cinéma"), "t-du-cin-ma");
        assert_eq!(slugify("!!!"), "item");
    }

    #[test]
    fn slugify_caps_length() {
        let long = "a".repeat(500);
        assert_eq!(slugify(&long).len(), MAX_SLUG_LEN);
    }

    #[test]
    fn collisions_get_counter_suffix() {
        let mut taken = HashSet::new();
        assert_eq!(first_free_slug("movie-night", &taken), "movie-night");

        taken.insert("movie-night".to_string());
        assert_eq!(first_free_slug("movie-night", &taken), "movie-night-1");

        taken.insert("movie-night-1".to_string());
        taken.insert("movie-night-2".to_string());
        assert_eq!(first_free_slug("movie-night", &taken), "movie-night-3");
    }

    #[test]
    fn gap_in_suffixes_is_reused() {
        let taken: HashSet<String> = ["binge", "binge-2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(first_free_slug("binge", &taken), "binge-1");
    }

    #[test]
    fn route_names_are_not_challenge_slugs() {
        assert_eq!(free_slug(SlugTable::Challenges, &slugify("Me"), vec![]), "me-1");
        assert_eq!(
            free_slug(SlugTable::Challenges, &slugify("Progress!"), vec!["progress-1".into()]),
            "progress-2"
        );
        assert_eq!(free_slug(SlugTable::Badges, "me", vec![]), "me");
    }
}
