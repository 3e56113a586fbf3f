use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Resolve a max-unavailable expression against a count.
///
/// The first present override wins; `100%` otherwise. Integers are used
/// verbatim (and may exceed the count). Percentages floor, but a positive
/// percentage of a positive count never resolves below 1. Malformed or
/// negative expressions resolve to 1, as does a zero count.
pub fn limit(count: usize, overrides: &[Option<&IntOrString>]) -> usize {
    if count == 0 {
        return 1;
    }
    let default = IntOrString::String("100%".to_string());
    let expression = overrides
        .iter()
        .find_map(|value| *value)
        .unwrap_or(&default);
    match expression {
        IntOrString::Int(value) if *value < 0 => 1,
        IntOrString::Int(value) => *value as usize,
        IntOrString::String(text) => percentage(count, text),
    }
}

fn percentage(count: usize, text: &str) -> usize {
    let Some(number) = text.strip_suffix('%') else {
        return 1;
    };
    let Ok(percent) = number.trim().parse::<i64>() else {
        return 1;
    };
    if percent < 0 {
        return 1;
    }
    let result = (count as i64 * percent) / 100;
    if result == 0 && percent > 0 {
        return 1;
    }
    result as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: i32) -> IntOrString {
        IntOrString::Int(value)
    }

    fn pct(text: &str) -> IntOrString {
        IntOrString::String(text.to_string())
    }

    #[test]
    fn default_is_everything() {
        assert_eq!(limit(10, &[None]), 10);
        assert_eq!(limit(10, &[]), 10);
    }

    #[test]
    fn first_present_override_wins() {
        assert_eq!(limit(10, &[None, Some(&int(3)), Some(&int(7))]), 3);
    }

    #[test]
    fn integers_are_verbatim_even_beyond_count() {
        assert_eq!(limit(4, &[Some(&int(100))]), 100);
        assert_eq!(limit(4, &[Some(&int(0))]), 0);
    }

    #[test]
    fn percentages_floor_but_round_up_to_one() {
        assert_eq!(limit(200, &[Some(&pct("25%"))]), 50);
        assert_eq!(limit(10, &[Some(&pct("25%"))]), 2);
        // 1% of 5 floors to zero; positive percent of positive count gives 1
        assert_eq!(limit(5, &[Some(&pct("1%"))]), 1);
        assert_eq!(limit(5, &[Some(&pct("0%"))]), 0);
    }

    #[test]
    fn malformed_and_negative_resolve_to_one() {
        assert_eq!(limit(10, &[Some(&pct("banana"))]), 1);
        assert_eq!(limit(10, &[Some(&pct("10"))]), 1);
        assert_eq!(limit(10, &[Some(&pct("-5%"))]), 1);
        assert_eq!(limit(10, &[Some(&int(-1))]), 1);
    }

    #[test]
    fn zero_count_is_always_one() {
        assert_eq!(limit(0, &[Some(&int(5))]), 1);
        assert_eq!(limit(0, &[]), 1);
    }
}
