use std::io::Read;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::ImportError;
use crate::models::NewStudent;

/// One spreadsheet row keyed by its column header.
pub type RosterRow = Map<String, Value>;

const FIRST_NAME: &[&str] = &["Prénom", "prenom", "firstName"];
const LAST_NAME: &[&str] = &["Nom", "nom", "lastName"];
const CLASS: &[&str] = &["Classe", "classe", "class"];
const LEVEL: &[&str] = &["Niveau", "niveau", "level"];
const EMAIL: &[&str] = &["Email", "email"];
const BIRTH_DATE: &[&str] = &["Date de naissance", "birthDate"];
const PARENT_CONTACT: &[&str] = &["Contact parent", "parentContact"];

fn cell_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// First alias holding a non-empty value wins.
fn pick(row: &RosterRow, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .find_map(|alias| row.get(*alias).and_then(cell_text))
}

pub fn normalize_row(row: &RosterRow) -> Option<NewStudent> {
    let first_name = pick(row, FIRST_NAME).unwrap_or_default();
    let last_name = pick(row, LAST_NAME).unwrap_or_default();
    if first_name.is_empty() || last_name.is_empty() {
        return None;
    }

    Some(NewStudent {
        first_name,
        last_name,
        class: pick(row, CLASS).unwrap_or_default(),
        level: pick(row, LEVEL),
        email: pick(row, EMAIL),
        birth_date: pick(row, BIRTH_DATE),
        parent_contact: pick(row, PARENT_CONTACT),
    })
}

pub fn normalize_rows(rows: &[RosterRow]) -> Vec<NewStudent> {
    rows.iter().filter_map(normalize_row).collect()
}

pub fn read_csv<R: Read>(reader: R) -> Result<Vec<RosterRow>, ImportError> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: RosterRow = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.clone(), Value::String(cell.to_string())))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Accepts the array-of-objects shape spreadsheet tools export.
pub fn read_json<R: Read>(reader: R) -> Result<Vec<RosterRow>, ImportError> {
    let value: Value =
        serde_json::from_reader(reader).map_err(|err| ImportError::Malformed(err.to_string()))?;
    let Value::Array(items) = value else {
        return Err(ImportError::Malformed("expected a list of rows".to_string()));
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(row) => Ok(row),
            _ => Err(ImportError::Malformed("every row must be an object".to_string())),
        })
        .collect()
}

pub fn load_roster(path: &Path) -> Result<Vec<NewStudent>, ImportError> {
    let file = std::fs::File::open(path)
        .map_err(|err| ImportError::Malformed(format!("{}: {err}", path.display())))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let rows = if is_json {
        read_json(file)?
    } else {
        read_csv(file)?
    };
    Ok(normalize_rows(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RosterRow {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn row_without_last_name_is_dropped() {
        let rows = vec![
            row(json!({ "Prénom": "Léa" })),
            row(json!({ "prenom": "Hugo", "Classe": "5ème A" })),
        ];
        assert!(normalize_rows(&rows).is_empty());
    }

    #[test]
    fn french_alias_wins_over_english() {
        let rows = vec![row(json!({
            "Prénom": "Inès",
            "firstName": "Ines",
            "Nom": "Moreau",
            "lastName": "Moro",
            "classe": "3ème C",
            "class": "3C",
        }))];

        let students = normalize_rows(&rows);
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].first_name, "Inès");
        assert_eq!(students[0].last_name, "Moreau");
        assert_eq!(students[0].class, "3ème C");
    }

    #[test]
    fn empty_cells_fall_through_to_next_alias() {
        let student = normalize_row(&row(json!({
            "Prénom": "",
            "firstName": "Tom",
            "nom": "Garcia",
            "Niveau": "",
        })))
        .expect("valid row");
        assert_eq!(student.first_name, "Tom");
        assert_eq!(student.class, "");
        assert_eq!(student.level, None);
    }

    #[test]
    fn numeric_cells_become_text() {
        let student = normalize_row(&row(json!({
            "firstName": "Jade",
            "lastName": "Faure",
            "parentContact": 612345678,
        })))
        .expect("valid row");
        assert_eq!(student.parent_contact.as_deref(), Some("612345678"));
    }

    #[test]
    fn csv_columns_can_come_in_any_order() {
        let data = "Classe,Nom,Prénom,Email\n6ème A,Lambert,Chloé,chloe@eleve.fr\n6ème B,,Sans Nom,\n";
        let rows = read_csv(data.as_bytes()).unwrap();
        let students = normalize_rows(&rows);
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].first_name, "Chloé");
        assert_eq!(students[0].class, "6ème A");
        assert_eq!(students[0].email.as_deref(), Some("chloe@eleve.fr"));
    }

    #[test]
    fn ragged_csv_is_a_single_malformed_error() {
        let data = "Nom,Prénom\nDupont,Marie,extra\n";
        match read_csv(data.as_bytes()) {
            Err(ImportError::Malformed(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn json_must_be_a_list_of_objects() {
        assert!(read_json(r#"{"Nom": "Dupont"}"#.as_bytes()).is_err());
        assert!(read_json(r#"[1, 2]"#.as_bytes()).is_err());
        let rows = read_json(r#"[{"Nom": "Dupont", "Prénom": "Marie"}]"#.as_bytes()).unwrap();
        assert_eq!(normalize_rows(&rows).len(), 1);
    }
}
