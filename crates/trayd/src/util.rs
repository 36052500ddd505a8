use extend::ext;
use itertools::Itertools;

#[macro_export]
macro_rules! print_result_err {
    ($context:expr, $result:expr $(,)?) => {{
        if let Err(err) = $result {
            log::error!("[{}:{}] Error {}: {:?}", ::std::file!(), ::std::line!(), $context, err);
        }
    }};
}

#[ext(pub, name = StringExt)]
impl<T: AsRef<str>> T {
    /// check if the string is empty after removing all linebreaks and trimming
    /// whitespace
    fn is_blank(self) -> bool {
        self.as_ref().replace('\n', "").trim().is_empty()
    }
}

/// Render rows of cells as left-aligned columns separated by two spaces.
pub fn format_columns<R: AsRef<[String]>>(rows: &[R]) -> String {
    let widths = rows.iter().fold(Vec::<usize>::new(), |mut widths, row| {
        for (i, cell) in row.as_ref().iter().enumerate() {
            match widths.get_mut(i) {
                Some(w) => *w = (*w).max(cell.chars().count()),
                None => widths.push(cell.chars().count()),
            }
        }
        widths
    });
    rows.iter()
        .map(|row| {
            let cells = row.as_ref();
            cells
                .iter()
                .enumerate()
                .map(|(i, cell)| if i + 1 == cells.len() { cell.clone() } else { format!("{:width$}", cell, width = widths[i]) })
                .join("  ")
        })
        .join("\n")
}
