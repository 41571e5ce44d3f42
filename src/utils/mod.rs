pub mod time;

/// Short random id for jobs and generated artifacts.
pub fn longid() -> String {
    nanoid::nanoid!(21)
}

/// Lower-case `name`, collapsing every run of non-alphanumerics into `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Dislocation Lines"), "dislocation-lines");
        assert_eq!(slugify("  Atoms / Per Frame!! "), "atoms-per-frame");
        assert_eq!(slugify("glb"), "glb");
    }

    #[test]
    fn test_longid_len() {
        assert_eq!(longid().len(), 21);
    }
}
