//! The table this binary migrates.

use live_migrate::{Entity, Result, Row, SqlValue, TableEntity};

/// Engagement counters (reads, likes, collections) for one business object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interactive {
    pub id: i64,
    pub biz_id: i64,
    pub biz: String,
    pub read_cnt: i64,
    pub like_cnt: i64,
    pub collect_cnt: i64,
    pub ctime: i64,
    pub utime: i64,
}

impl Entity for Interactive {
    fn id(&self) -> i64 {
        self.id
    }

    // utime differs between copies written by different phases; it is not
    // business data.
    fn compare_to(&self, other: &Self) -> bool {
        self.biz_id == other.biz_id
            && self.biz == other.biz
            && self.read_cnt == other.read_cnt
            && self.like_cnt == other.like_cnt
            && self.collect_cnt == other.collect_cnt
            && self.ctime == other.ctime
    }
}

impl TableEntity for Interactive {
    const TABLE: &'static str = "interactives";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "biz_id",
        "biz",
        "read_cnt",
        "like_cnt",
        "collect_cnt",
        "ctime",
        "utime",
    ];

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_i64("id")?,
            biz_id: row.try_i64("biz_id")?,
            biz: row.try_string("biz")?,
            read_cnt: row.try_i64("read_cnt")?,
            like_cnt: row.try_i64("like_cnt")?,
            collect_cnt: row.try_i64("collect_cnt")?,
            ctime: row.try_i64("ctime")?,
            utime: row.try_i64("utime")?,
        })
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::I64(self.id),
            SqlValue::I64(self.biz_id),
            SqlValue::from(self.biz.as_str()),
            SqlValue::I64(self.read_cnt),
            SqlValue::I64(self.like_cnt),
            SqlValue::I64(self.collect_cnt),
            SqlValue::I64(self.ctime),
            SqlValue::I64(self.utime),
        ]
    }

    fn updated_at(&self) -> i64 {
        self.utime
    }
}
