use std::path::{Path, PathBuf};

use crate::error::{ModelError, Result};
use crate::params::Country;

/// Source of per-country initial conditions, in a fixed country order
pub trait InitialConditions {
    fn countries(&self) -> Result<Vec<Country>>;
}

/// Countries listed directly in an experiment file
#[derive(Debug, Clone, Default)]
pub struct InlineCountries {
    pub countries: Vec<Country>,
}

impl InlineCountries {
    pub fn new(countries: Vec<Country>) -> Self {
        InlineCountries { countries }
    }
}

impl InitialConditions for InlineCountries {
    fn countries(&self) -> Result<Vec<Country>> {
        for country in &self.countries {
            country.validate()?;
        }
        Ok(self.countries.clone())
    }
}

/// Wide Maddison-style tables: country names in the first row, the year's
/// values in the second, the first column a row label
///
/// Blank or unreadable cells count as zero and countries without a GDP
/// figure are left out.
#[derive(Debug, Clone)]
pub struct MaddisonCsv {
    pub gdp_path: PathBuf,
    pub population_path: PathBuf,
    pub limit: Option<usize>,
}

impl MaddisonCsv {
    pub fn new(gdp_path: impl Into<PathBuf>, population_path: impl Into<PathBuf>) -> Self {
        MaddisonCsv {
            gdp_path: gdp_path.into(),
            population_path: population_path.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Column names and the values of the first data row, first column dropped
fn read_year_row(path: &Path) -> Result<(Vec<String>, Vec<f64>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut records = reader.records();

    let names: Vec<String> = match records.next() {
        Some(header) => header?.iter().skip(1).map(|s| s.trim().to_string()).collect(),
        None => {
            return Err(ModelError::configuration(format!(
                "{} has no header row",
                path.display()
            )))
        }
    };
    let values: Vec<f64> = match records.next() {
        Some(row) => row?
            .iter()
            .skip(1)
            .map(|cell| {
                cell.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .unwrap_or(0.0)
            })
            .collect(),
        None => {
            return Err(ModelError::configuration(format!(
                "{} has no data row",
                path.display()
            )))
        }
    };
    Ok((names, values))
}

impl InitialConditions for MaddisonCsv {
    fn countries(&self) -> Result<Vec<Country>> {
        let (names, gdp) = read_year_row(&self.gdp_path)?;
        let (_, population) = read_year_row(&self.population_path)?;

        let countries: Vec<Country> = gdp
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != 0.0)
            .map(|(column, &value)| {
                let name = names
                    .get(column)
                    .filter(|n| !n.is_empty())
                    .cloned()
                    .unwrap_or_else(|| format!("country_{column}"));
                let population = population.get(column).copied().unwrap_or(0.0);
                Country::new(name, value, population)
            })
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();

        for country in &countries {
            country.validate()?;
        }
        tracing::debug!(
            countries = countries.len(),
            path = %self.gdp_path.display(),
            "read initial conditions"
        );
        Ok(countries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tech_div_{}_{}", std::process::id(), name));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn reads_second_row_and_skips_missing_countries() {
        let gdp = write("gdp.csv", "year,Austria,Belgium,Chad,Denmark\n1870,1863,2692,,2003\n");
        let pop = write("pop.csv", "year,Austria,Belgium,Chad,Denmark\n1870,4520,5096,1000,1888\n");

        let countries = MaddisonCsv::new(&gdp, &pop).countries().unwrap();
        let names: Vec<&str> = countries.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Austria", "Belgium", "Denmark"]);
        assert_eq!(countries[2].initial_gdp, 2003.0);
        assert_eq!(countries[2].population, 1888.0);

        fs::remove_file(gdp).unwrap();
        fs::remove_file(pop).unwrap();
    }

    #[test]
    fn nan_cells_count_as_missing_and_limit_applies() {
        let gdp = write("gdp_nan.csv", "year,A,B,C,D\n1870,NaN,100,200,300\n");
        let pop = write("pop_nan.csv", "year,A,B,C,D\n1870,1,2,3,4\n");

        let countries = MaddisonCsv::new(&gdp, &pop)
            .with_limit(2)
            .countries()
            .unwrap();
        assert_eq!(countries.len(), 2);
        assert_eq!(countries[0].name, "B");
        assert_eq!(countries[1].initial_gdp, 200.0);

        fs::remove_file(gdp).unwrap();
        fs::remove_file(pop).unwrap();
    }

    #[test]
    fn missing_data_row_is_an_error() {
        let gdp = write("gdp_short.csv", "year,A\n");
        let result = MaddisonCsv::new(&gdp, &gdp).countries();
        assert!(matches!(result, Err(ModelError::Configuration(_))));
        fs::remove_file(gdp).unwrap();
    }

    #[test]
    fn inline_countries_are_validated() {
        let source = InlineCountries::new(vec![Country::new("X", -5.0, 1.0)]);
        assert!(source.countries().is_err());
    }
}
