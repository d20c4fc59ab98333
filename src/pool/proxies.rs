use rand::seq::SliceRandom;

/// Uniform pick from the operator's proxy list.
pub fn pick_proxy(list: &[String]) -> Option<String> {
    list.choose(&mut rand::thread_rng()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_yields_none() {
        assert!(pick_proxy(&[]).is_none());
    }

    #[test]
    fn pick_comes_from_the_list() {
        let list = vec!["http://a:1".to_string(), "http://b:2".to_string()];
        for _ in 0..20 {
            let picked = pick_proxy(&list).unwrap();
            assert!(list.contains(&picked));
        }
    }
}
