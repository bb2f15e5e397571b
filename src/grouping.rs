//! Pure list-shaping passes: grouping a page into buckets, merging a page
//! onto an existing list and collapsing a list after a delete. Nothing here
//! performs I/O; every operation returns a new `GroupedList`.

use crate::models::{Bucket, GroupedList, Grouping, Marker, Record, RecordKey, Row};

/// Partitions records (already in descending key order) into buckets.
/// A new bucket starts whenever the group key changes; order is preserved.
pub fn group_records(records: Vec<Record>, grouping: Grouping) -> Vec<Bucket> {
    let mut buckets: Vec<Bucket> = Vec::new();
    for record in records {
        let group_key = grouping.key_for(&record.key);
        match buckets.last_mut() {
            Some(bucket) if bucket.group_key == group_key => bucket.records.push(record),
            _ => buckets.push(Bucket {
                group_key,
                records: vec![record],
            }),
        }
    }
    buckets
}

impl GroupedList {
    /// Transitional state of a full reload.
    pub fn loading() -> Self {
        Self {
            buckets: Vec::new(),
            marker: Some(Marker::Loading),
        }
    }

    /// Builds a list from a single first page.
    pub fn from_page(records: Vec<Record>, grouping: Grouping, end_of_data: bool, total: usize) -> Self {
        Self {
            buckets: group_records(records, grouping),
            marker: None,
        }
        .settle(end_of_data, total)
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn marker(&self) -> Option<Marker> {
        self.marker
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.buckets.iter().map(Row::Bucket).chain(self.marker.map(|marker| match marker {
            Marker::Loading => Row::Loading,
            Marker::Empty => Row::Empty,
            Marker::Exhausted => Row::Exhausted,
        }))
    }

    pub fn record_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.records.len()).sum()
    }

    pub fn is_exhausted(&self) -> bool {
        self.marker == Some(Marker::Exhausted)
    }

    pub fn is_empty_marker(&self) -> bool {
        self.marker == Some(Marker::Empty)
    }

    pub fn contains(&self, key: &RecordKey, grouping: Grouping) -> bool {
        self.position_of(key, grouping).is_some()
    }

    /// Same buckets with a trailing loading marker appended.
    pub fn with_loading(&self) -> Self {
        Self {
            buckets: self.buckets.clone(),
            marker: Some(Marker::Loading),
        }
    }

    /// Same buckets without a loading marker left behind by a superseded load.
    pub fn settled(&self) -> Self {
        let marker = self.marker.filter(|marker| *marker != Marker::Loading);
        Self {
            buckets: self.buckets.clone(),
            marker,
        }
    }

    /// Appends a page loaded after the current content. When the page starts in
    /// the group of the last bucket, that bucket is extended instead of
    /// duplicated; the rest of the page forms new trailing buckets.
    pub fn merge_page(&self, records: Vec<Record>, grouping: Grouping, end_of_data: bool, total: usize) -> Self {
        let mut buckets = self.buckets.clone();
        let mut incoming = group_records(records, grouping).into_iter().peekable();

        let continues_last = match (buckets.last(), incoming.peek()) {
            (Some(last), Some(first)) => last.group_key == first.group_key,
            _ => false,
        };
        if continues_last {
            if let (Some(last), Some(head)) = (buckets.last_mut(), incoming.next()) {
                last.records.extend(head.records);
            }
        }
        buckets.extend(incoming);

        Self { buckets, marker: None }.settle(end_of_data, total)
    }

    /// Removes one record. An emptied bucket is dropped; an exhausted list
    /// left without buckets becomes the empty-state list. `None` when the key
    /// is not present.
    pub fn without_record(&self, key: &RecordKey, grouping: Grouping) -> Option<Self> {
        let (bucket_index, record_index) = self.position_of(key, grouping)?;
        let mut buckets = self.buckets.clone();
        buckets[bucket_index].records.remove(record_index);
        if buckets[bucket_index].records.is_empty() {
            buckets.remove(bucket_index);
        }

        let marker = match self.marker {
            Some(Marker::Exhausted) if buckets.is_empty() => Some(Marker::Empty),
            other => other,
        };
        Some(Self { buckets, marker })
    }

    fn position_of(&self, key: &RecordKey, grouping: Grouping) -> Option<(usize, usize)> {
        let group_key = grouping.key_for(key);
        let bucket_index = self
            .buckets
            .iter()
            .position(|bucket| bucket.group_key == group_key)?;
        let record_index = self.buckets[bucket_index]
            .records
            .iter()
            .position(|record| record.key == *key)?;
        Some((bucket_index, record_index))
    }

    fn settle(mut self, end_of_data: bool, total: usize) -> Self {
        let exhausted = end_of_data || self.record_count() >= total;
        self.marker = match (exhausted, self.buckets.is_empty()) {
            (true, true) => Some(Marker::Empty),
            (true, false) => Some(Marker::Exhausted),
            (false, _) => None,
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::group_records;
    use crate::models::{GroupedList, Grouping, Marker, Record, RecordKey, Row};

    fn record(raw: &str) -> Record {
        Record {
            key: RecordKey::parse(raw).expect("key"),
            title: format!("entry {raw}"),
            thumbnail: None,
        }
    }

    fn months(list: &GroupedList) -> Vec<(String, usize)> {
        list.buckets()
            .iter()
            .map(|bucket| (bucket.group_key.to_string(), bucket.records.len()))
            .collect()
    }

    fn sample() -> Vec<Record> {
        vec![
            record("2024-03-20T10:00:00Z"),
            record("2024-03-02T10:00:00Z"),
            record("2024-02-28T10:00:00Z"),
            record("2024-02-14T10:00:00Z"),
            record("2024-02-01T10:00:00Z"),
            record("2023-12-31T10:00:00Z"),
        ]
    }

    #[test]
    fn grouping_partitions_without_reordering() {
        let records = sample();
        let buckets = group_records(records.clone(), Grouping::Month);
        let keys = buckets
            .iter()
            .map(|bucket| bucket.group_key.to_string())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["2024-03", "2024-02", "2023-12"]);

        let flattened = buckets
            .into_iter()
            .flat_map(|bucket| bucket.records)
            .collect::<Vec<_>>();
        assert_eq!(flattened, records);
    }

    #[test]
    fn grouping_empty_page_yields_no_buckets() {
        assert!(group_records(Vec::new(), Grouping::Month).is_empty());
    }

    #[test]
    fn two_chunks_match_one_chunk_when_boundary_is_mid_group() {
        let records = sample();
        let whole = GroupedList::from_page(records.clone(), Grouping::Month, false, 100);

        let first = GroupedList::from_page(records[..3].to_vec(), Grouping::Month, false, 100);
        let merged = first.merge_page(records[3..].to_vec(), Grouping::Month, false, 100);

        assert_eq!(merged.buckets(), whole.buckets());
        assert_eq!(months(&merged), vec![
            ("2024-03".to_string(), 2),
            ("2024-02".to_string(), 3),
            ("2023-12".to_string(), 1),
        ]);
    }

    #[test]
    fn merge_page_starting_a_new_group_appends_buckets() {
        let records = sample();
        let first = GroupedList::from_page(records[..2].to_vec(), Grouping::Month, false, 6);
        let merged = first.merge_page(records[2..].to_vec(), Grouping::Month, false, 6);
        assert_eq!(merged.buckets().len(), 3);
        assert_eq!(merged.marker(), Some(Marker::Exhausted));
    }

    #[test]
    fn first_page_markers_follow_total() {
        let empty = GroupedList::from_page(Vec::new(), Grouping::Month, true, 0);
        assert_eq!(empty.rows().collect::<Vec<_>>(), vec![Row::Empty]);

        let partial = GroupedList::from_page(sample()[..2].to_vec(), Grouping::Month, false, 6);
        assert_eq!(partial.marker(), None);

        let complete = GroupedList::from_page(sample(), Grouping::Month, false, 6);
        assert!(complete.is_exhausted());
        assert!(matches!(complete.rows().last(), Some(Row::Exhausted)));
    }

    #[test]
    fn short_page_ends_the_list_even_when_count_is_ahead() {
        let list = GroupedList::from_page(sample()[..2].to_vec(), Grouping::Month, true, 6);
        assert!(list.is_exhausted());
    }

    #[test]
    fn deleting_sole_record_drops_the_bucket() {
        let list = GroupedList::from_page(sample(), Grouping::Month, false, 100);
        let key = RecordKey::parse("2023-12-31T10:00:00Z").expect("key");
        let next = list.without_record(&key, Grouping::Month).expect("present");
        assert_eq!(months(&next), vec![("2024-03".to_string(), 2), ("2024-02".to_string(), 3)]);
        assert_eq!(list.buckets().len(), 3);
    }

    #[test]
    fn deleting_one_of_many_keeps_relative_order() {
        let list = GroupedList::from_page(sample(), Grouping::Month, false, 100);
        let key = RecordKey::parse("2024-02-14T10:00:00Z").expect("key");
        let next = list.without_record(&key, Grouping::Month).expect("present");
        let february = &next.buckets()[1];
        let remaining = february
            .records
            .iter()
            .map(|record| record.key.to_string())
            .collect::<Vec<_>>();
        assert_eq!(remaining, vec!["2024-02-28T10:00:00.000000Z", "2024-02-01T10:00:00.000000Z"]);
    }

    #[test]
    fn deleting_last_record_of_exhausted_list_shows_empty_state() {
        let only = vec![record("2024-01-05T10:00:00Z")];
        let list = GroupedList::from_page(only, Grouping::Month, true, 1);
        let key = RecordKey::parse("2024-01-05T10:00:00Z").expect("key");
        let next = list.without_record(&key, Grouping::Month).expect("present");
        assert!(next.is_empty_marker());
        assert!(next.buckets().is_empty());
    }

    #[test]
    fn missing_key_is_reported_as_none() {
        let list = GroupedList::from_page(sample(), Grouping::Month, false, 100);
        let absent = RecordKey::parse("2024-03-21T10:00:00Z").expect("key");
        assert!(list.without_record(&absent, Grouping::Month).is_none());
        assert!(!list.contains(&absent, Grouping::Month));
    }

    #[test]
    fn rows_serialize_as_tagged_sequence() {
        let list = GroupedList::from_page(sample()[..1].to_vec(), Grouping::Month, true, 1);
        let json = serde_json::to_value(&list).expect("serialize");
        assert_eq!(json[0]["type"], "bucket");
        assert_eq!(json[0]["groupKey"], "2024-03");
        assert_eq!(json[0]["records"][0]["title"], "entry 2024-03-20T10:00:00Z");
        assert_eq!(json[1], serde_json::json!({ "type": "exhausted" }));
    }

    #[test]
    fn settled_drops_only_loading_marker() {
        let list = GroupedList::from_page(sample(), Grouping::Month, false, 100);
        assert_eq!(list.with_loading().settled(), list);

        let exhausted = GroupedList::from_page(sample(), Grouping::Month, true, 6);
        assert_eq!(exhausted.settled().marker(), Some(Marker::Exhausted));
    }
}
