use crate::lupin_common::*;
use fnv::FnvHashMap;
use std::collections::BTreeSet;

/// Cells kept after cleaning an annotation column
#[derive(Debug, Clone)]
pub struct AnnotatedCells {
    /// kept rows of the original dataset, in their original order
    pub rows: Vec<usize>,
    /// annotation value of each kept row
    pub values: Vec<Box<str>>,
    /// sorted distinct values; a label is an index into this
    pub classes: Vec<Box<str>>,
    /// class code of each kept row
    pub labels: Vec<u32>,
}

/// Drop cells without an annotation and groups smaller than
/// `min_group_size`, then encode the remaining values as labels
///
/// * `data` - dataset
/// * `column` - annotation column in `obs`
/// * `min_group_size` - smallest group to keep
pub fn clean_annotation(
    data: &SpatialData,
    column: &str,
    min_group_size: usize,
) -> anyhow::Result<AnnotatedCells> {
    let col = data.obs_column(column).ok_or_else(|| {
        LupinError::configuration(format!("annotation column {} is not in obs", column))
    })?;

    let values = col.values();

    let mut counts: FnvHashMap<&str, usize> = FnvHashMap::default();
    for v in values.iter().flatten() {
        *counts.entry(v.as_ref()).or_default() += 1;
    }

    let n_missing = values.iter().filter(|v| v.is_none()).count();
    if n_missing > 0 {
        warn!("{} cells without {} annotation are removed", n_missing, column);
    }

    let mut small = counts
        .iter()
        .filter(|(_, c)| **c < min_group_size)
        .map(|(&k, &c)| (k, c))
        .collect::<Vec<_>>();
    small.sort();
    for (k, c) in small.iter() {
        warn!(
            "group {} has {} cells (< {}) and is removed",
            k, c, min_group_size
        );
    }

    let (rows, kept): (Vec<usize>, Vec<Box<str>>) = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| match v {
            Some(v) if counts[v.as_ref()] >= min_group_size => Some((i, v.clone())),
            _ => None,
        })
        .unzip();

    if rows.is_empty() {
        return Err(LupinError::data(format!(
            "no annotation group of {} has at least {} cells",
            column, min_group_size
        )));
    }

    let classes = kept
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();

    let code: FnvHashMap<&str, u32> = classes
        .iter()
        .enumerate()
        .map(|(k, c)| (c.as_ref(), k as u32))
        .collect();

    let labels = kept.iter().map(|v| code[v.as_ref()]).collect();

    info!(
        "{} of {} cells in {} annotation groups",
        rows.len(),
        data.num_obs(),
        classes.len()
    );

    Ok(AnnotatedCells {
        rows,
        values: kept,
        classes,
        labels,
    })
}

/// Distinct values in order of first appearance, each with its rows;
/// missing values are skipped
pub fn group_rows(column: &ObsColumn) -> Vec<(Box<str>, Vec<usize>)> {
    let mut position: FnvHashMap<Box<str>, usize> = FnvHashMap::default();
    let mut ret: Vec<(Box<str>, Vec<usize>)> = vec![];
    for (i, v) in column.values().into_iter().enumerate() {
        let Some(v) = v else { continue };
        match position.get(&v) {
            Some(&g) => ret[g].1.push(i),
            None => {
                position.insert(v.clone(), ret.len());
                ret.push((v, vec![i]));
            }
        }
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_beans::sparse_util::csr_from_dense;

    fn with_annotation(values: &[Option<&str>]) -> SpatialData {
        let nn = values.len();
        let x = csr_from_dense(&Mat::from_element(nn, 2, 1.0));
        let names = (0..nn).map(|i| i.to_string().into_boxed_str()).collect();
        let mut data = SpatialData::new(x, names, vec!["g1".into(), "g2".into()]).unwrap();
        let text = values
            .iter()
            .map(|v| v.unwrap_or("").into())
            .collect::<Vec<Box<str>>>();
        let mut categories: Vec<Box<str>> = vec![];
        let codes = values
            .iter()
            .map(|v| match v {
                Some(v) => match categories.iter().position(|c| &**c == *v) {
                    Some(k) => k as i32,
                    None => {
                        categories.push((*v).into());
                        categories.len() as i32 - 1
                    }
                },
                None => -1,
            })
            .collect();
        data.set_obs_column("text", ObsColumn::Text(text)).unwrap();
        data.set_obs_column("cat", ObsColumn::Categorical { codes, categories })
            .unwrap();
        data
    }

    #[test]
    fn drops_missing_and_small_groups() -> anyhow::Result<()> {
        let values = [
            Some("b"),
            Some("a"),
            None,
            Some("b"),
            Some("c"),
            Some("a"),
            Some("b"),
        ];
        let data = with_annotation(&values);
        let cells = clean_annotation(&data, "cat", 2)?;
        assert_eq!(cells.rows, vec![0, 1, 3, 5, 6]);
        let expected: Vec<Box<str>> = vec!["a".into(), "b".into()];
        assert_eq!(cells.classes, expected);
        assert_eq!(cells.labels, vec![1, 0, 1, 0, 1]);
        Ok(())
    }

    #[test]
    fn missing_column_is_a_configuration_error() {
        let data = with_annotation(&[Some("a")]);
        let err = clean_annotation(&data, "nothing", 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LupinError>(),
            Some(LupinError::Configuration(_))
        ));
    }

    #[test]
    fn nothing_left_is_a_data_error() {
        let data = with_annotation(&[Some("a"), Some("b")]);
        let err = clean_annotation(&data, "cat", 30).unwrap_err();
        assert!(matches!(err.downcast_ref::<LupinError>(), Some(LupinError::Data(_))));
    }

    #[test]
    fn groups_in_order_of_appearance() {
        let data = with_annotation(&[Some("z"), Some("a"), None, Some("z")]);
        let groups = group_rows(data.obs_column("cat").unwrap());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], ("z".into(), vec![0, 3]));
        assert_eq!(groups[1], ("a".into(), vec![1]));
    }
}
