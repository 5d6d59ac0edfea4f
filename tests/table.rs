use revenue_pipeline::table::render_table;

fn strings(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

#[test]
fn render_table_right_aligns_numbers() {
    let headers = strings(&["id", "Region"]);
    let rows = vec![strings(&["1", "Asia"]), strings(&["12", "Europe"])];

    let rendered = render_table(&headers, &rows);
    let lines: Vec<&str> = rendered.lines().collect();

    assert_eq!(
        lines,
        vec!["id   Region", "---  ------", "  1  Asia", " 12  Europe"]
    );
}

#[test]
fn render_table_normalizes_control_characters() {
    let headers = strings(&["note"]);
    let rows = vec![strings(&["line1\nline2\tvalue"])];

    let rendered = render_table(&headers, &rows);
    let lines: Vec<&str> = rendered.lines().collect();

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2], "line1 line2 value");
}

#[test]
fn render_table_measures_unicode_by_characters() {
    let headers = strings(&["résumé", "R² Score"]);
    let rows = vec![strings(&["café", "0.98"])];

    let rendered = render_table(&headers, &rows);
    let lines: Vec<&str> = rendered.lines().collect();

    assert_eq!(lines[0], "résumé  R² Score");
    assert_eq!(lines[1], "------  --------");
    assert_eq!(lines[2], "café        0.98");
}

#[test]
fn render_table_ignores_cells_beyond_the_header() {
    let headers = strings(&["Model"]);
    let rows = vec![strings(&["Linear Regression", "extra"])];

    let rendered = render_table(&headers, &rows);
    assert!(!rendered.contains("extra"));
}
