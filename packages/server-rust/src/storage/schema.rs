//! Property-to-column naming rules.
//!
//! Scalars map 1:1 to snake_case columns. A `Vec2` property `p` flattens to
//! `p_x, p_y`, except the property named `position`, which flattens to the
//! bare `x, y`. A reference property `r` maps to `r_id`. Table names are the
//! snake_cased plural of the class name (see `EntityKind::table`).

/// Column pair for a `Vec2` property.
#[must_use]
pub fn columns_for_vec2(property: &str) -> (String, String) {
    if property == "position" {
        ("x".to_string(), "y".to_string())
    } else {
        (format!("{property}_x"), format!("{property}_y"))
    }
}

/// Foreign-key column for a reference property.
#[must_use]
pub fn column_for_ref(property: &str) -> String {
    format!("{property}_id")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_flattens_to_bare_xy() {
        assert_eq!(columns_for_vec2("position"), ("x".into(), "y".into()));
    }

    #[test]
    fn other_vec2_properties_get_suffixes() {
        assert_eq!(columns_for_vec2("spawn"), ("spawn_x".into(), "spawn_y".into()));
    }

    #[test]
    fn references_get_id_suffix() {
        assert_eq!(column_for_ref("location"), "location_id");
        assert_eq!(column_for_ref("user"), "user_id");
    }
}
