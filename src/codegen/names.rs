use std::collections::{HashMap, HashSet};

/// Hands out unique symbol names for compiled functions.
///
/// One interner lives for exactly one compile call, so two modules never see
/// each other's names.
#[derive(Debug, Default)]
pub struct NameInterner {
    taken: HashSet<String>,
    next_suffix: HashMap<String, u32>,
}

impl NameInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, base: &str) -> String {
        let base = sanitize(base);
        if self.taken.insert(base.clone()) {
            return base;
        }

        let suffix = self.next_suffix.entry(base.clone()).or_insert(1);
        loop {
            let candidate = format!("{base}_{suffix}");
            *suffix += 1;
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    match cleaned.chars().next() {
        None => "_".to_string(),
        Some(c) if c.is_ascii_digit() => format!("_{cleaned}"),
        Some(_) => cleaned,
    }
}
