use varia_ir::DataRow;

/// Object name for one row's image: `{id}_image_{unix_millis}_{row_index}.png`.
///
/// The id comes from `id_column` (`row` when absent or blank), reduced to
/// characters safe in object names.
pub fn object_name(row: &DataRow, id_column: &str, row_index: usize, unix_millis: i64) -> String {
    let id = row
        .get(id_column)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("row");
    let id: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_image_{}_{}.png", id, unix_millis, row_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_name() {
        let mut row = DataRow::new();
        row.insert("projectId".into(), "p1".into());
        assert_eq!(
            object_name(&row, "projectId", 3, 1_700_000_000_000),
            "p1_image_1700000000000_3.png"
        );
    }

    #[test]
    fn test_object_name_fallback_and_sanitizing() {
        let mut row = DataRow::new();
        assert_eq!(object_name(&row, "id", 0, 5), "row_image_5_0.png");
        row.insert("id".into(), "../a b/c".into());
        assert_eq!(object_name(&row, "id", 1, 5), ".._a_b_c_image_5_1.png");
    }
}
