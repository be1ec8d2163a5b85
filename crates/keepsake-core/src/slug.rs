//! Slug Generation
//!
//! Couple names become URL-safe page addresses: `"Ana & Léo"` → `ana-leo`.
//! Collisions get a numeric suffix (`ana-leo-1`, `ana-leo-2`, …).

use crate::error::Result;
use crate::store::OrderStore;

/// Used when a name has no usable characters at all
pub const FALLBACK_SLUG: &str = "memorial";

/// Normalize a couple name into a base slug
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars().flat_map(fold_accent) {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    if slug.is_empty() {
        FALLBACK_SLUG.into()
    } else {
        slug
    }
}

/// `base` for `n == 0`, `base-n` otherwise
pub fn with_suffix(base: &str, n: usize) -> String {
    if n == 0 { base.to_string() } else { format!("{base}-{n}") }
}

/// First free slug for `couple_name`, probing suffixes from `start`.
///
/// Advisory only: the store's unique constraint on insert is the real guard.
pub fn generate_unique_slug<S: OrderStore + ?Sized>(
    store: &S,
    couple_name: &str,
    start: usize,
) -> Result<(String, usize)> {
    let base = slugify(couple_name);
    let mut n = start;
    loop {
        let candidate = with_suffix(&base, n);
        if !store.exists_by_slug(&candidate)? {
            return Ok((candidate, n));
        }
        n += 1;
    }
}

fn fold_accent(c: char) -> impl Iterator<Item = char> {
    let folded: &'static str = match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' => "a",
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => "e",
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => "i",
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => "o",
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => "u",
        'ç' | 'Ç' => "c",
        'ñ' | 'Ñ' => "n",
        'ý' | 'ÿ' | 'Ý' => "y",
        'ß' => "ss",
        'æ' | 'Æ' => "ae",
        'ø' | 'Ø' => "o",
        _ => "",
    };
    let keep = folded.is_empty().then_some(c);
    folded.chars().chain(keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryOrderStore;
    use crate::testing::sample_order;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Ana & Leo"), "ana-leo");
        assert_eq!(slugify("  --Ana   &&  Leo!! "), "ana-leo");
        assert_eq!(slugify("João e Conceição"), "joao-e-conceicao");
        assert_eq!(slugify("Zoë + Björn 2024"), "zoe-bjorn-2024");
    }

    #[test]
    fn test_slugify_empty_falls_back() {
        assert_eq!(slugify("❤️ & ❤️"), FALLBACK_SLUG);
        assert_eq!(slugify(""), FALLBACK_SLUG);
    }

    #[test]
    fn test_unique_slug_without_collision() {
        let store = MemoryOrderStore::new();
        let (slug, n) = generate_unique_slug(&store, "Ana & Leo", 0).unwrap();
        assert_eq!(slug, "ana-leo");
        assert_eq!(n, 0);
    }

    #[test]
    fn test_unique_slug_appends_suffix() {
        let store = MemoryOrderStore::new();
        store.create(sample_order("ana-leo")).unwrap();
        store.create(sample_order("ana-leo-1")).unwrap();

        let (slug, n) = generate_unique_slug(&store, "Ana & Leo", 0).unwrap();
        assert_eq!(slug, "ana-leo-2");
        assert_eq!(n, 2);
    }
}
