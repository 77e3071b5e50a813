// 行为列表查询构造：把可选过滤条件累积为编号占位符 SQL 与有序绑定参数，用户输入绝不拼入语句文本。
use chrono::{DateTime, Utc};

pub const BEHAVIOR_TABLE: &str = "behaviors";
pub const BEHAVIOR_COLUMNS: &str =
    "id, \"key\", user_id, data, created_at, updated_at, deleted_at";

/// 软删除墓碑条件，所有读路径与删除路径共用同一份。
pub const NOT_DELETED: &str = "deleted_at IS NULL";

/// 占位符风格：Postgres 使用 `$n`，SQLite 使用 `?n`，二者都按位置编号绑定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Dollar,
    Question,
}

impl Placeholder {
    fn render(self, index: usize) -> String {
        match self {
            Placeholder::Dollar => format!("${index}"),
            Placeholder::Question => format!("?{index}"),
        }
    }
}

/// 与后端无关的绑定值，由各存储实现转换为自身的参数类型。
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Text(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub text: String,
    pub values: Vec<QueryValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorQuery {
    pub key: Option<String>,
    pub user_id: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub page: i64,
    pub page_size: i64,
}

impl BehaviorQuery {
    /// 空 key 与非正 user_id 视为"不过滤"。
    pub fn new(
        key: &str,
        user_id: i64,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        page: i64,
        page_size: i64,
    ) -> Self {
        Self {
            key: Some(key.to_string()).filter(|value| !value.is_empty()),
            user_id: Some(user_id).filter(|value| *value > 0),
            start_time,
            end_time,
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn limit(&self) -> i64 {
        self.page_size.max(1)
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.limit())
    }
}

struct FilterClause {
    placeholder: Placeholder,
    predicates: Vec<String>,
    values: Vec<QueryValue>,
}

impl FilterClause {
    fn from_query(query: &BehaviorQuery, placeholder: Placeholder) -> Self {
        let mut clause = Self {
            placeholder,
            predicates: vec![NOT_DELETED.to_string()],
            values: Vec::new(),
        };
        // 固定顺序：key、user_id、起始时间、结束时间。
        if let Some(key) = &query.key {
            clause.push("\"key\" =", QueryValue::Text(key.clone()));
        }
        if let Some(user_id) = query.user_id {
            clause.push("user_id =", QueryValue::Integer(user_id));
        }
        if let Some(start) = query.start_time {
            clause.push("created_at >=", QueryValue::Timestamp(start));
        }
        if let Some(end) = query.end_time {
            clause.push("created_at <=", QueryValue::Timestamp(end));
        }
        clause
    }

    fn bind(&mut self, value: QueryValue) -> String {
        self.values.push(value);
        self.placeholder.render(self.values.len())
    }

    fn push(&mut self, column_op: &str, value: QueryValue) {
        let slot = self.bind(value);
        self.predicates.push(format!("{column_op} {slot}"));
    }

    fn where_sql(&self) -> String {
        self.predicates.join(" AND ")
    }
}

/// 分页查询语句：WHERE 参数之后紧接 LIMIT/OFFSET 两个参数。
pub fn build_select(query: &BehaviorQuery, placeholder: Placeholder) -> SqlStatement {
    let mut clause = FilterClause::from_query(query, placeholder);
    let where_sql = clause.where_sql();
    let limit = clause.bind(QueryValue::Integer(query.limit()));
    let offset = clause.bind(QueryValue::Integer(query.offset()));
    SqlStatement {
        text: format!(
            "SELECT {BEHAVIOR_COLUMNS} FROM {BEHAVIOR_TABLE} WHERE {where_sql} \
             ORDER BY created_at DESC, id DESC LIMIT {limit} OFFSET {offset}"
        ),
        values: clause.values,
    }
}

/// 计数语句：同样的过滤条件，独立从 1 编号，不含分页参数。
pub fn build_count(query: &BehaviorQuery, placeholder: Placeholder) -> SqlStatement {
    let clause = FilterClause::from_query(query, placeholder);
    SqlStatement {
        text: format!(
            "SELECT COUNT(*) FROM {BEHAVIOR_TABLE} WHERE {}",
            clause.where_sql()
        ),
        values: clause.values,
    }
}
