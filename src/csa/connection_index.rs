use std::{
    collections::{BTreeMap, btree_map},
    iter::Flatten,
    ops::RangeBounds,
};

use crate::csa::Connection;

/// Connections ordered by departure instant.
///
/// Backed by a B-tree keyed by departure; connections sharing a departure are
/// all kept, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionIndex {
    by_departure: BTreeMap<i64, Vec<Connection>>,
    len: usize,
}

impl ConnectionIndex {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, connection: Connection) {
        self.by_departure
            .entry(connection.departure)
            .or_default()
            .push(connection);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All connections, by non-decreasing departure.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.by_departure.values().flatten()
    }

    /// Connections whose departure lies in `range`.
    pub fn range<R: RangeBounds<i64>>(&self, range: R) -> impl Iterator<Item = &Connection> {
        self.by_departure.range(range).flat_map(|(_, c)| c)
    }

    /// Connections departing at or after `departure`.
    pub fn connections_after(&self, departure: i64) -> impl Iterator<Item = &Connection> {
        self.range(departure..)
    }

    pub fn first(&self) -> Option<&Connection> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<&Connection> {
        self.by_departure.values().next_back().and_then(|c| c.last())
    }

    pub fn into_vec(self) -> Vec<Connection> {
        let mut connections = Vec::with_capacity(self.len);
        connections.extend(self);
        connections
    }
}

impl Extend<Connection> for ConnectionIndex {
    fn extend<T: IntoIterator<Item = Connection>>(&mut self, iter: T) {
        iter.into_iter().for_each(|c| self.insert(c));
    }
}

impl FromIterator<Connection> for ConnectionIndex {
    fn from_iter<T: IntoIterator<Item = Connection>>(iter: T) -> Self {
        let mut index = Self::new();
        index.extend(iter);
        index
    }
}

impl<'a> IntoIterator for &'a ConnectionIndex {
    type Item = &'a Connection;
    type IntoIter = Flatten<btree_map::Values<'a, i64, Vec<Connection>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.by_departure.values().flatten()
    }
}

impl IntoIterator for ConnectionIndex {
    type Item = Connection;
    type IntoIter = Flatten<btree_map::IntoValues<i64, Vec<Connection>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.by_departure.into_values().flatten()
    }
}
