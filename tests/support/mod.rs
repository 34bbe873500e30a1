//! In-memory store evaluating the expressions the mapper sends.

#![allow(dead_code)]

use aws_sdk_dynamodb::{
    operation::{
        batch_get_item::{BatchGetItemInput, BatchGetItemOutput},
        batch_write_item::{BatchWriteItemInput, BatchWriteItemOutput},
        delete_item::{DeleteItemInput, DeleteItemOutput},
        get_item::{GetItemInput, GetItemOutput},
        put_item::{PutItemInput, PutItemOutput},
        query::{QueryInput, QueryOutput},
        scan::{ScanInput, ScanOutput},
        transact_get_items::{TransactGetItemsInput, TransactGetItemsOutput},
        transact_write_items::{TransactWriteItemsInput, TransactWriteItemsOutput},
        update_item::{UpdateItemInput, UpdateItemOutput},
    },
    types::{AttributeValue, ItemResponse, KeysAndAttributes, ReturnValue, Select, WriteRequest},
};
use dynamodb_mapper::store::{CONDITIONAL_CHECK_FAILED, Store, StoreError};
use parking_lot::Mutex;
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

pub type Item = HashMap<String, AttributeValue>;
type Names = HashMap<String, String>;
type Values = HashMap<String, AttributeValue>;
type StoreResult<T> = Result<T, StoreError>;

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::Service(message.into().into())
}

pub fn s(value: &str) -> AttributeValue {
    AttributeValue::S(value.to_string())
}

pub fn n(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

#[derive(Clone, Debug)]
struct KeyDef {
    partition: String,
    sort: Option<String>,
}

impl KeyDef {
    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition.as_str()).chain(self.sort.as_deref())
    }
}

#[derive(Debug)]
struct Table {
    key: KeyDef,
    indexes: HashMap<String, KeyDef>,
    items: Vec<Item>,
}

/// One request seen by the store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Call {
    pub operation: &'static str,
    pub table: String,
    pub index: Option<String>,
    pub key_condition: Option<String>,
    pub filter: Option<String>,
    pub condition: Option<String>,
    pub update: Option<String>,
    pub projection: Option<String>,
    pub consistent_read: Option<bool>,
    pub limit: Option<i32>,
    pub segment: Option<i32>,
    pub requests: usize,
}

#[derive(Debug, Default)]
struct Faults {
    unprocessed_write_rounds: usize,
    unprocessed_get_rounds: usize,
    failing_segment: Option<i32>,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
    calls: Vec<Call>,
    faults: Faults,
}

/// Shared in-memory tables.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a table keyed by `partition` and `sort`.
    pub fn table(self, name: &str, partition: &str, sort: Option<&str>) -> Self {
        self.state.lock().tables.insert(
            name.to_string(),
            Table {
                key: KeyDef {
                    partition: partition.to_string(),
                    sort: sort.map(str::to_string),
                },
                indexes: HashMap::new(),
                items: Vec::new(),
            },
        );
        self
    }

    /// Declares a secondary index of `table`.
    pub fn index(self, table: &str, index: &str, partition: &str, sort: Option<&str>) -> Self {
        if let Some(table) = self.state.lock().tables.get_mut(table) {
            table.indexes.insert(
                index.to_string(),
                KeyDef {
                    partition: partition.to_string(),
                    sort: sort.map(str::to_string),
                },
            );
        }
        self
    }

    /// The next `rounds` batch writes apply only their first request.
    pub fn unprocessed_writes(&self, rounds: usize) {
        self.state.lock().faults.unprocessed_write_rounds = rounds;
    }

    /// The next `rounds` batch reads answer only their first key.
    pub fn unprocessed_gets(&self, rounds: usize) {
        self.state.lock().faults.unprocessed_get_rounds = rounds;
    }

    /// Scans of `segment` fail.
    pub fn fail_segment(&self, segment: i32) {
        self.state.lock().faults.failing_segment = Some(segment);
    }

    /// Every call waits `latency` before answering.
    pub fn latency(&self, latency: Duration) {
        self.state.lock().faults.latency = Some(latency);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn operations(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|call| call.operation).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Raw items of `table`.
    pub fn items(&self, table: &str) -> Vec<Item> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|table| table.items.clone())
            .unwrap_or_default()
    }

    /// Raw item of `table` under `key`.
    pub fn item(&self, table: &str, key: &Item) -> Option<Item> {
        let state = self.state.lock();
        let table = state.tables.get(table)?;
        table
            .items
            .iter()
            .find(|item| same_key(&table.key, item, key))
            .cloned()
    }

    /// Stores `item` directly.
    pub fn insert(&self, table: &str, item: Item) {
        let mut state = self.state.lock();
        if let Some(table) = state.tables.get_mut(table) {
            table.put(item);
        }
    }

    async fn enter(&self, call: Call) {
        let latency = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.faults.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn same_key(key: &KeyDef, item: &Item, other: &Item) -> bool {
    key.names()
        .all(|name| item.get(name).is_some() && item.get(name) == other.get(name))
}

impl Table {
    fn position(&self, key: &Item) -> Option<usize> {
        self.items
            .iter()
            .position(|item| same_key(&self.key, item, key))
    }

    fn get(&self, key: &Item) -> Option<&Item> {
        self.position(key).map(|at| &self.items[at])
    }

    fn check_key(&self, item: &Item) -> StoreResult<()> {
        for name in self.key.names() {
            if !item.contains_key(name) {
                return Err(invalid(format!("missing key attribute {name}")));
            }
        }
        Ok(())
    }

    fn put(&mut self, item: Item) {
        match self.position(&item) {
            Some(at) => self.items[at] = item,
            None => self.items.push(item),
        }
    }

    fn delete(&mut self, key: &Item) -> Option<Item> {
        self.position(key).map(|at| self.items.remove(at))
    }

    fn key_of(&self, item: &Item, index: Option<&KeyDef>) -> Item {
        self.key
            .names()
            .chain(index.into_iter().flat_map(KeyDef::names))
            .filter_map(|name| item.get(name).map(|value| (name.to_string(), value.clone())))
            .collect()
    }

    fn sort_tuple(&self, item: &Item, index: Option<&KeyDef>) -> Vec<Option<AttributeValue>> {
        index
            .into_iter()
            .flat_map(KeyDef::names)
            .chain(self.key.names())
            .map(|name| item.get(name).cloned())
            .collect()
    }

    /// Items of the table or index in key order.
    fn ordered(&self, index: Option<&KeyDef>) -> Vec<&Item> {
        let mut items: Vec<_> = self
            .items
            .iter()
            .filter(|item| index.is_none_or(|index| index.names().all(|name| item.contains_key(name))))
            .collect();
        items.sort_by(|left, right| compare_tuples(&self.sort_tuple(left, index), &self.sort_tuple(right, index)));
        items
    }
}

fn table<'a>(state: &'a mut State, name: &str) -> StoreResult<&'a mut Table> {
    state
        .tables
        .get_mut(name)
        .ok_or_else(|| invalid(format!("unknown table {name}")))
}

fn type_rank(value: &AttributeValue) -> u8 {
    match value {
        AttributeValue::N(_) => 0,
        AttributeValue::S(_) => 1,
        AttributeValue::B(_) => 2,
        _ => 3,
    }
}

fn compare_values(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    match (left, right) {
        (AttributeValue::N(left), AttributeValue::N(right)) => {
            let left: f64 = left.parse().ok()?;
            let right: f64 = right.parse().ok()?;
            left.partial_cmp(&right)
        }
        (AttributeValue::S(left), AttributeValue::S(right)) => Some(left.cmp(right)),
        (AttributeValue::B(left), AttributeValue::B(right)) => Some(left.as_ref().cmp(right.as_ref())),
        _ => None,
    }
}

fn compare_tuples(left: &[Option<AttributeValue>], right: &[Option<AttributeValue>]) -> Ordering {
    for (left, right) in left.iter().zip(right) {
        let ordering = match (left, right) {
            (Some(left), Some(right)) => compare_values(left, right)
                .unwrap_or_else(|| type_rank(left).cmp(&type_rank(right))),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn values_equal(left: &AttributeValue, right: &AttributeValue) -> bool {
    match (left, right) {
        (AttributeValue::N(_), AttributeValue::N(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        (AttributeValue::Ss(left), AttributeValue::Ss(right)) => {
            left.iter().collect::<HashSet<_>>() == right.iter().collect::<HashSet<_>>()
        }
        (AttributeValue::Ns(left), AttributeValue::Ns(right)) => {
            left.iter().collect::<HashSet<_>>() == right.iter().collect::<HashSet<_>>()
        }
        _ => left == right,
    }
}

// Expressions

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Name(String),
    Value(String),
    Word(String),
    Number(usize),
    Symbol(&'static str),
}

fn tokenize(expression: &str) -> StoreResult<Vec<Token>> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut at = 0;
    let word = |at: &mut usize| {
        let start = *at;
        while *at < chars.len() && (chars[*at].is_alphanumeric() || chars[*at] == '_') {
            *at += 1;
        }
        chars[start..*at].iter().collect::<String>()
    };
    while at < chars.len() {
        let c = chars[at];
        match c {
            ' ' | '\t' | '\n' => at += 1,
            '#' => {
                at += 1;
                tokens.push(Token::Name(format!("#{}", word(&mut at))));
            }
            ':' => {
                at += 1;
                tokens.push(Token::Value(format!(":{}", word(&mut at))));
            }
            '(' | ')' | ',' | '.' | '[' | ']' | '+' | '-' | '=' => {
                let symbol = match c {
                    '(' => "(",
                    ')' => ")",
                    ',' => ",",
                    '.' => ".",
                    '[' => "[",
                    ']' => "]",
                    '+' => "+",
                    '-' => "-",
                    _ => "=",
                };
                tokens.push(Token::Symbol(symbol));
                at += 1;
            }
            '<' | '>' => {
                let next = chars.get(at + 1).copied();
                let symbol = match (c, next) {
                    ('<', Some('>')) => "<>",
                    ('<', Some('=')) => "<=",
                    ('>', Some('=')) => ">=",
                    ('<', _) => "<",
                    _ => ">",
                };
                at += symbol.len();
                tokens.push(Token::Symbol(symbol));
            }
            c if c.is_ascii_digit() => {
                let digits = word(&mut at);
                let number = digits
                    .parse()
                    .map_err(|_| invalid(format!("bad number {digits}")))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => tokens.push(Token::Word(word(&mut at))),
            other => return Err(invalid(format!("unexpected character {other}"))),
        }
    }
    Ok(tokens)
}

#[derive(Clone, Debug)]
enum Segment {
    Attribute(String),
    Index(usize),
}

type Path = Vec<Segment>;

#[derive(Clone, Debug)]
enum Operand {
    Path(Path),
    Value(AttributeValue),
    Size(Path),
}

#[derive(Clone, Debug)]
enum Cond {
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
    Not(Box<Cond>),
    Compare(Operand, &'static str, Operand),
    Between(Operand, Operand, Operand),
    In(Operand, Vec<Operand>),
    Exists(Path),
    NotExists(Path),
    BeginsWith(Operand, Operand),
    Contains(Operand, Operand),
}

#[derive(Clone, Debug)]
enum Term {
    Operand(Operand),
    IfNotExists(Path, Box<Term>),
    ListAppend(Box<Term>, Box<Term>),
    Plus(Box<Term>, Box<Term>),
    Minus(Box<Term>, Box<Term>),
}

#[derive(Clone, Debug)]
enum Action {
    Set(Path, Term),
    Add(Path, AttributeValue),
    Remove(Path),
    Delete(Path, AttributeValue),
}

struct Parser<'a> {
    tokens: Vec<Token>,
    at: usize,
    names: &'a Names,
    values: &'a Values,
}

impl<'a> Parser<'a> {
    fn new(expression: &str, names: &'a Names, values: &'a Values) -> StoreResult<Self> {
        Ok(Self {
            tokens: tokenize(expression)?,
            at: 0,
            names,
            values,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at)
    }

    fn next(&mut self) -> StoreResult<Token> {
        let token = self
            .tokens
            .get(self.at)
            .cloned()
            .ok_or_else(|| invalid("unexpected end of expression"))?;
        self.at += 1;
        Ok(token)
    }

    fn done(&self) -> bool {
        self.at >= self.tokens.len()
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(found)) if found.eq_ignore_ascii_case(word))
    }

    fn is_symbol(&self, symbol: &str) -> bool {
        matches!(self.peek(), Some(Token::Symbol(found)) if *found == symbol)
    }

    fn expect_symbol(&mut self, symbol: &str) -> StoreResult<()> {
        match self.next()? {
            Token::Symbol(found) if found == symbol => Ok(()),
            other => Err(invalid(format!("expected {symbol}, found {other:?}"))),
        }
    }

    fn expect_word(&mut self, word: &str) -> StoreResult<()> {
        match self.next()? {
            Token::Word(found) if found.eq_ignore_ascii_case(word) => Ok(()),
            other => Err(invalid(format!("expected {word}, found {other:?}"))),
        }
    }

    fn attribute(&mut self) -> StoreResult<String> {
        match self.next()? {
            Token::Name(placeholder) => self
                .names
                .get(&placeholder)
                .cloned()
                .ok_or_else(|| invalid(format!("unknown name {placeholder}"))),
            Token::Word(word) => Ok(word),
            other => Err(invalid(format!("expected an attribute, found {other:?}"))),
        }
    }

    fn path(&mut self) -> StoreResult<Path> {
        let mut path = vec![Segment::Attribute(self.attribute()?)];
        loop {
            if self.is_symbol(".") {
                self.at += 1;
                path.push(Segment::Attribute(self.attribute()?));
            } else if self.is_symbol("[") {
                self.at += 1;
                match self.next()? {
                    Token::Number(index) => path.push(Segment::Index(index)),
                    other => return Err(invalid(format!("expected an index, found {other:?}"))),
                }
                self.expect_symbol("]")?;
            } else {
                return Ok(path);
            }
        }
    }

    fn value(&mut self) -> StoreResult<AttributeValue> {
        match self.next()? {
            Token::Value(placeholder) => self
                .values
                .get(&placeholder)
                .cloned()
                .ok_or_else(|| invalid(format!("unknown value {placeholder}"))),
            other => Err(invalid(format!("expected a value, found {other:?}"))),
        }
    }

    fn operand(&mut self) -> StoreResult<Operand> {
        if matches!(self.peek(), Some(Token::Value(_))) {
            return Ok(Operand::Value(self.value()?));
        }
        if self.is_word("size") && self.tokens.get(self.at + 1) == Some(&Token::Symbol("(")) {
            self.at += 2;
            let path = self.path()?;
            self.expect_symbol(")")?;
            return Ok(Operand::Size(path));
        }
        Ok(Operand::Path(self.path()?))
    }

    fn condition(&mut self) -> StoreResult<Cond> {
        let mut left = self.conjunction()?;
        while self.is_word("OR") {
            self.at += 1;
            left = Cond::Or(Box::new(left), Box::new(self.conjunction()?));
        }
        Ok(left)
    }

    fn conjunction(&mut self) -> StoreResult<Cond> {
        let mut left = self.negation()?;
        while self.is_word("AND") {
            self.at += 1;
            left = Cond::And(Box::new(left), Box::new(self.negation()?));
        }
        Ok(left)
    }

    fn negation(&mut self) -> StoreResult<Cond> {
        if self.is_word("NOT") {
            self.at += 1;
            return Ok(Cond::Not(Box::new(self.negation()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> StoreResult<Cond> {
        if self.is_symbol("(") {
            self.at += 1;
            let condition = self.condition()?;
            self.expect_symbol(")")?;
            return Ok(condition);
        }
        let function = match self.peek() {
            Some(Token::Word(word)) if self.tokens.get(self.at + 1) == Some(&Token::Symbol("(")) => {
                Some(word.to_ascii_lowercase())
            }
            _ => None,
        };
        match function.as_deref() {
            Some("attribute_exists") | Some("attribute_not_exists") => {
                self.at += 2;
                let path = self.path()?;
                self.expect_symbol(")")?;
                return Ok(if function.as_deref() == Some("attribute_exists") {
                    Cond::Exists(path)
                } else {
                    Cond::NotExists(path)
                });
            }
            Some("begins_with") | Some("contains") => {
                self.at += 2;
                let target = self.operand()?;
                self.expect_symbol(",")?;
                let operand = self.operand()?;
                self.expect_symbol(")")?;
                return Ok(if function.as_deref() == Some("begins_with") {
                    Cond::BeginsWith(target, operand)
                } else {
                    Cond::Contains(target, operand)
                });
            }
            _ => {}
        }
        let left = self.operand()?;
        if self.is_word("BETWEEN") {
            self.at += 1;
            let low = self.operand()?;
            self.expect_word("AND")?;
            let high = self.operand()?;
            return Ok(Cond::Between(left, low, high));
        }
        if self.is_word("IN") {
            self.at += 1;
            self.expect_symbol("(")?;
            let mut operands = vec![self.operand()?];
            while self.is_symbol(",") {
                self.at += 1;
                operands.push(self.operand()?);
            }
            self.expect_symbol(")")?;
            return Ok(Cond::In(left, operands));
        }
        let comparator = match self.next()? {
            Token::Symbol(symbol @ ("=" | "<>" | "<" | "<=" | ">" | ">=")) => symbol,
            other => return Err(invalid(format!("expected a comparator, found {other:?}"))),
        };
        Ok(Cond::Compare(left, comparator, self.operand()?))
    }

    fn term(&mut self) -> StoreResult<Term> {
        let left = self.single_term()?;
        if self.is_symbol("+") {
            self.at += 1;
            return Ok(Term::Plus(Box::new(left), Box::new(self.single_term()?)));
        }
        if self.is_symbol("-") {
            self.at += 1;
            return Ok(Term::Minus(Box::new(left), Box::new(self.single_term()?)));
        }
        Ok(left)
    }

    fn single_term(&mut self) -> StoreResult<Term> {
        if self.is_word("if_not_exists") {
            self.at += 1;
            self.expect_symbol("(")?;
            let path = self.path()?;
            self.expect_symbol(",")?;
            let fallback = self.single_term()?;
            self.expect_symbol(")")?;
            return Ok(Term::IfNotExists(path, Box::new(fallback)));
        }
        if self.is_word("list_append") {
            self.at += 1;
            self.expect_symbol("(")?;
            let first = self.single_term()?;
            self.expect_symbol(",")?;
            let second = self.single_term()?;
            self.expect_symbol(")")?;
            return Ok(Term::ListAppend(Box::new(first), Box::new(second)));
        }
        Ok(Term::Operand(self.operand()?))
    }

    fn actions(&mut self) -> StoreResult<Vec<Action>> {
        let mut actions = Vec::new();
        while !self.done() {
            let keyword = match self.next()? {
                Token::Word(word) => word.to_ascii_uppercase(),
                other => return Err(invalid(format!("expected a clause, found {other:?}"))),
            };
            loop {
                let path = self.path()?;
                let action = match keyword.as_str() {
                    "SET" => {
                        self.expect_symbol("=")?;
                        Action::Set(path, self.term()?)
                    }
                    "ADD" => Action::Add(path, self.value()?),
                    "REMOVE" => Action::Remove(path),
                    "DELETE" => Action::Delete(path, self.value()?),
                    other => return Err(invalid(format!("unknown clause {other}"))),
                };
                actions.push(action);
                if self.is_symbol(",") {
                    self.at += 1;
                } else {
                    break;
                }
            }
        }
        Ok(actions)
    }
}

fn parse_condition(expression: &str, names: &Names, values: &Values) -> StoreResult<Cond> {
    let mut parser = Parser::new(expression, names, values)?;
    let condition = parser.condition()?;
    if !parser.done() {
        return Err(invalid(format!("trailing tokens in {expression}")));
    }
    Ok(condition)
}

fn resolve<'a>(item: &'a Item, path: &Path) -> Option<&'a AttributeValue> {
    let mut segments = path.iter();
    let mut current = match segments.next()? {
        Segment::Attribute(name) => item.get(name)?,
        Segment::Index(_) => return None,
    };
    for segment in segments {
        current = match (segment, current) {
            (Segment::Attribute(name), AttributeValue::M(map)) => map.get(name)?,
            (Segment::Index(index), AttributeValue::L(list)) => list.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

fn size_of(value: &AttributeValue) -> Option<usize> {
    Some(match value {
        AttributeValue::S(value) => value.chars().count(),
        AttributeValue::B(value) => value.as_ref().len(),
        AttributeValue::L(value) => value.len(),
        AttributeValue::M(value) => value.len(),
        AttributeValue::Ss(value) => value.len(),
        AttributeValue::Ns(value) => value.len(),
        AttributeValue::Bs(value) => value.len(),
        _ => return None,
    })
}

fn operand_value(item: &Item, operand: &Operand) -> Option<AttributeValue> {
    match operand {
        Operand::Path(path) => resolve(item, path).cloned(),
        Operand::Value(value) => Some(value.clone()),
        Operand::Size(path) => resolve(item, path).and_then(size_of).map(n),
    }
}

fn evaluate(item: &Item, condition: &Cond) -> bool {
    match condition {
        Cond::And(left, right) => evaluate(item, left) && evaluate(item, right),
        Cond::Or(left, right) => evaluate(item, left) || evaluate(item, right),
        Cond::Not(inner) => !evaluate(item, inner),
        Cond::Compare(left, comparator, right) => {
            let (Some(left), Some(right)) = (operand_value(item, left), operand_value(item, right)) else {
                return *comparator == "<>";
            };
            match *comparator {
                "=" => values_equal(&left, &right),
                "<>" => !values_equal(&left, &right),
                comparator => {
                    let Some(ordering) = compare_values(&left, &right) else {
                        return false;
                    };
                    match comparator {
                        "<" => ordering == Ordering::Less,
                        "<=" => ordering != Ordering::Greater,
                        ">" => ordering == Ordering::Greater,
                        _ => ordering != Ordering::Less,
                    }
                }
            }
        }
        Cond::Between(target, low, high) => {
            let (Some(target), Some(low), Some(high)) = (
                operand_value(item, target),
                operand_value(item, low),
                operand_value(item, high),
            ) else {
                return false;
            };
            compare_values(&target, &low).is_some_and(|ordering| ordering != Ordering::Less)
                && compare_values(&target, &high).is_some_and(|ordering| ordering != Ordering::Greater)
        }
        Cond::In(target, operands) => operand_value(item, target).is_some_and(|target| {
            operands
                .iter()
                .filter_map(|operand| operand_value(item, operand))
                .any(|value| values_equal(&target, &value))
        }),
        Cond::Exists(path) => resolve(item, path).is_some(),
        Cond::NotExists(path) => resolve(item, path).is_none(),
        Cond::BeginsWith(target, prefix) => {
            match (operand_value(item, target), operand_value(item, prefix)) {
                (Some(AttributeValue::S(target)), Some(AttributeValue::S(prefix))) => {
                    target.starts_with(&prefix)
                }
                _ => false,
            }
        }
        Cond::Contains(target, operand) => {
            match (operand_value(item, target), operand_value(item, operand)) {
                (Some(AttributeValue::S(target)), Some(AttributeValue::S(part))) => target.contains(&part),
                (Some(AttributeValue::Ss(set)), Some(AttributeValue::S(member))) => set.contains(&member),
                (Some(AttributeValue::Ns(set)), Some(AttributeValue::N(member))) => set.contains(&member),
                (Some(AttributeValue::L(list)), Some(member)) => {
                    list.iter().any(|value| values_equal(value, &member))
                }
                _ => false,
            }
        }
    }
}

fn matches(
    item: &Item,
    expression: Option<&str>,
    names: &Option<Names>,
    values: &Option<Values>,
) -> StoreResult<bool> {
    let Some(expression) = expression else {
        return Ok(true);
    };
    let empty_names = Names::new();
    let empty_values = Values::new();
    let condition = parse_condition(
        expression,
        names.as_ref().unwrap_or(&empty_names),
        values.as_ref().unwrap_or(&empty_values),
    )?;
    Ok(evaluate(item, &condition))
}

fn arithmetic(left: &AttributeValue, right: &AttributeValue, sign: i8) -> StoreResult<AttributeValue> {
    let (AttributeValue::N(left), AttributeValue::N(right)) = (left, right) else {
        return Err(invalid("arithmetic on non-numbers"));
    };
    if let (Ok(left), Ok(right)) = (left.parse::<i128>(), right.parse::<i128>()) {
        return Ok(n(left + i128::from(sign) * right));
    }
    let left: f64 = left.parse().map_err(|_| invalid("bad number"))?;
    let right: f64 = right.parse().map_err(|_| invalid("bad number"))?;
    Ok(n(left + f64::from(sign) * right))
}

fn term_value(item: &Item, term: &Term) -> StoreResult<AttributeValue> {
    match term {
        Term::Operand(operand) => {
            operand_value(item, operand).ok_or_else(|| invalid("operand refers to a missing attribute"))
        }
        Term::IfNotExists(path, fallback) => match resolve(item, path) {
            Some(value) => Ok(value.clone()),
            None => term_value(item, fallback),
        },
        Term::ListAppend(first, second) => {
            match (term_value(item, first)?, term_value(item, second)?) {
                (AttributeValue::L(mut first), AttributeValue::L(second)) => {
                    first.extend(second);
                    Ok(AttributeValue::L(first))
                }
                _ => Err(invalid("list_append on non-lists")),
            }
        }
        Term::Plus(left, right) => arithmetic(&term_value(item, left)?, &term_value(item, right)?, 1),
        Term::Minus(left, right) => arithmetic(&term_value(item, left)?, &term_value(item, right)?, -1),
    }
}

fn assign(item: &mut Item, path: &Path, value: AttributeValue) -> StoreResult<()> {
    let (last, parents) = path.split_last().ok_or_else(|| invalid("empty path"))?;
    if parents.is_empty() {
        return match last {
            Segment::Attribute(name) => {
                item.insert(name.clone(), value);
                Ok(())
            }
            Segment::Index(_) => Err(invalid("path starts with an index")),
        };
    }
    let mut current = match &parents[0] {
        Segment::Attribute(name) => item
            .get_mut(name)
            .ok_or_else(|| invalid("document path does not exist"))?,
        Segment::Index(_) => return Err(invalid("path starts with an index")),
    };
    for segment in &parents[1..] {
        current = match (segment, current) {
            (Segment::Attribute(name), AttributeValue::M(map)) => map
                .get_mut(name)
                .ok_or_else(|| invalid("document path does not exist"))?,
            (Segment::Index(index), AttributeValue::L(list)) => list
                .get_mut(*index)
                .ok_or_else(|| invalid("document path does not exist"))?,
            _ => return Err(invalid("document path does not exist")),
        };
    }
    match (last, current) {
        (Segment::Attribute(name), AttributeValue::M(map)) => {
            map.insert(name.clone(), value);
        }
        (Segment::Index(index), AttributeValue::L(list)) => {
            if *index < list.len() {
                list[*index] = value;
            } else {
                list.push(value);
            }
        }
        _ => return Err(invalid("document path does not exist")),
    }
    Ok(())
}

fn remove_path(item: &mut Item, path: &Path) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    if parents.is_empty() {
        if let Segment::Attribute(name) = last {
            item.remove(name);
        }
        return;
    }
    let mut current = match &parents[0] {
        Segment::Attribute(name) => match item.get_mut(name) {
            Some(value) => value,
            None => return,
        },
        Segment::Index(_) => return,
    };
    for segment in &parents[1..] {
        let next = match (segment, current) {
            (Segment::Attribute(name), AttributeValue::M(map)) => map.get_mut(name),
            (Segment::Index(index), AttributeValue::L(list)) => list.get_mut(*index),
            _ => None,
        };
        current = match next {
            Some(value) => value,
            None => return,
        };
    }
    match (last, current) {
        (Segment::Attribute(name), AttributeValue::M(map)) => {
            map.remove(name);
        }
        (Segment::Index(index), AttributeValue::L(list)) if *index < list.len() => {
            list.remove(*index);
        }
        _ => {}
    }
}

fn apply_update(item: &Item, expression: &str, names: &Names, values: &Values) -> StoreResult<Item> {
    let actions = Parser::new(expression, names, values)?.actions()?;
    let original = item.clone();
    let mut updated = item.clone();
    for action in actions {
        match action {
            Action::Set(path, term) => {
                let value = term_value(&original, &term)?;
                assign(&mut updated, &path, value)?;
            }
            Action::Add(path, value) => {
                let value = match (resolve(&updated, &path), value) {
                    (None, value) => value,
                    (Some(current @ AttributeValue::N(_)), value @ AttributeValue::N(_)) => {
                        arithmetic(current, &value, 1)?
                    }
                    (Some(AttributeValue::Ss(current)), AttributeValue::Ss(added)) => {
                        let mut set = current.clone();
                        set.extend(added.into_iter().filter(|member| !current.contains(member)));
                        AttributeValue::Ss(set)
                    }
                    (Some(AttributeValue::Ns(current)), AttributeValue::Ns(added)) => {
                        let mut set = current.clone();
                        set.extend(added.into_iter().filter(|member| !current.contains(member)));
                        AttributeValue::Ns(set)
                    }
                    _ => return Err(invalid("ADD on an unsupported type")),
                };
                assign(&mut updated, &path, value)?;
            }
            Action::Remove(path) => remove_path(&mut updated, &path),
            Action::Delete(path, value) => {
                let remaining = match (resolve(&updated, &path), value) {
                    (None, _) => continue,
                    (Some(AttributeValue::Ss(current)), AttributeValue::Ss(removed)) => {
                        let set: Vec<_> = current.iter().filter(|member| !removed.contains(member)).cloned().collect();
                        (!set.is_empty()).then_some(AttributeValue::Ss(set))
                    }
                    (Some(AttributeValue::Ns(current)), AttributeValue::Ns(removed)) => {
                        let set: Vec<_> = current.iter().filter(|member| !removed.contains(member)).cloned().collect();
                        (!set.is_empty()).then_some(AttributeValue::Ns(set))
                    }
                    _ => return Err(invalid("DELETE on an unsupported type")),
                };
                match remaining {
                    Some(value) => assign(&mut updated, &path, value)?,
                    None => remove_path(&mut updated, &path),
                }
            }
        }
    }
    Ok(updated)
}

fn project(item: &Item, projection: Option<&str>, names: &Option<Names>) -> StoreResult<Item> {
    let Some(projection) = projection else {
        return Ok(item.clone());
    };
    let empty_names = Names::new();
    let empty_values = Values::new();
    let mut parser = Parser::new(projection, names.as_ref().unwrap_or(&empty_names), &empty_values)?;
    let mut kept = HashSet::new();
    loop {
        if let Some(Segment::Attribute(name)) = parser.path()?.first() {
            kept.insert(name.clone());
        }
        if parser.is_symbol(",") {
            parser.at += 1;
        } else {
            break;
        }
    }
    Ok(item
        .iter()
        .filter(|(name, _)| kept.contains(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect())
}

struct ReadRequest<'a> {
    table: &'a str,
    index: Option<&'a str>,
    key_condition: Option<&'a str>,
    filter: Option<&'a str>,
    projection: Option<&'a str>,
    names: &'a Option<Names>,
    values: &'a Option<Values>,
    exclusive_start_key: Option<&'a Item>,
    limit: Option<i32>,
    select: Option<&'a Select>,
    forward: bool,
    segment: Option<(i32, i32)>,
}

struct ReadResult {
    items: Vec<Item>,
    count: i32,
    last_evaluated_key: Option<Item>,
}

fn segment_of(item: &Item, key: &KeyDef, total: i32) -> i32 {
    let rendered = format!("{:?}", item.get(&key.partition));
    let sum: u64 = rendered.bytes().map(u64::from).sum();
    (sum % u64::try_from(total.max(1)).unwrap_or(1)) as i32
}

fn read(state: &mut State, request: ReadRequest<'_>) -> StoreResult<ReadResult> {
    let table = table(state, request.table)?;
    let index = match request.index {
        Some(name) => Some(
            table
                .indexes
                .get(name)
                .cloned()
                .ok_or_else(|| invalid(format!("unknown index {name}")))?,
        ),
        None => None,
    };
    let mut candidates = Vec::new();
    for item in table.ordered(index.as_ref()) {
        if let Some((segment, total)) = request.segment {
            if segment_of(item, &table.key, total) != segment {
                continue;
            }
        }
        if matches(item, request.key_condition, request.names, request.values)? {
            candidates.push(item);
        }
    }
    if !request.forward {
        candidates.reverse();
    }
    if let Some(start) = request.exclusive_start_key {
        let start = table.sort_tuple(start, index.as_ref());
        candidates.retain(|item| {
            let ordering = compare_tuples(&table.sort_tuple(item, index.as_ref()), &start);
            if request.forward {
                ordering == Ordering::Greater
            } else {
                ordering == Ordering::Less
            }
        });
    }
    let limit = request
        .limit
        .and_then(|limit| usize::try_from(limit).ok())
        .unwrap_or(usize::MAX);
    let evaluated: Vec<_> = candidates.iter().take(limit).collect();
    let last_evaluated_key = (candidates.len() > evaluated.len())
        .then(|| evaluated.last().map(|item| table.key_of(item, index.as_ref())))
        .flatten();
    let counting = request.select == Some(&Select::Count);
    let mut items = Vec::new();
    let mut count = 0;
    for item in evaluated {
        if matches(item, request.filter, request.names, request.values)? {
            count += 1;
            if !counting {
                items.push(project(item, request.projection, request.names)?);
            }
        }
    }
    Ok(ReadResult {
        items,
        count,
        last_evaluated_key,
    })
}

fn canceled(reasons: Vec<bool>) -> StoreError {
    StoreError::TransactionCanceled {
        reasons: reasons
            .into_iter()
            .map(|failed| {
                Some(if failed {
                    CONDITIONAL_CHECK_FAILED.to_string()
                } else {
                    "None".to_string()
                })
            })
            .collect(),
    }
}

impl Store for MemoryStore {
    async fn get_item(&self, input: GetItemInput) -> StoreResult<GetItemOutput> {
        let table_name = input.table_name.clone().unwrap_or_default();
        self.enter(Call {
            operation: "GetItem",
            table: table_name.clone(),
            projection: input.projection_expression.clone(),
            consistent_read: input.consistent_read,
            ..Default::default()
        })
        .await;
        let mut state = self.state.lock();
        let table = table(&mut state, &table_name)?;
        let key = input.key.unwrap_or_default();
        let item = match table.get(&key) {
            Some(item) => Some(project(
                item,
                input.projection_expression.as_deref(),
                &input.expression_attribute_names,
            )?),
            None => None,
        };
        Ok(GetItemOutput::builder().set_item(item).build())
    }

    async fn put_item(&self, input: PutItemInput) -> StoreResult<PutItemOutput> {
        let table_name = input.table_name.clone().unwrap_or_default();
        self.enter(Call {
            operation: "PutItem",
            table: table_name.clone(),
            condition: input.condition_expression.clone(),
            ..Default::default()
        })
        .await;
        let mut state = self.state.lock();
        let table = table(&mut state, &table_name)?;
        let item = input.item.unwrap_or_default();
        table.check_key(&item)?;
        let current = table.get(&item).cloned().unwrap_or_default();
        if !matches(
            &current,
            input.condition_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )? {
            return Err(StoreError::ConditionalCheckFailed);
        }
        table.put(item);
        Ok(PutItemOutput::builder().build())
    }

    async fn update_item(&self, input: UpdateItemInput) -> StoreResult<UpdateItemOutput> {
        let table_name = input.table_name.clone().unwrap_or_default();
        self.enter(Call {
            operation: "UpdateItem",
            table: table_name.clone(),
            condition: input.condition_expression.clone(),
            update: input.update_expression.clone(),
            ..Default::default()
        })
        .await;
        let mut state = self.state.lock();
        let table = table(&mut state, &table_name)?;
        let key = input.key.unwrap_or_default();
        table.check_key(&key)?;
        let current = table.get(&key).cloned();
        let base = current.clone().unwrap_or_else(|| key.clone());
        if !matches(
            &current.unwrap_or_default(),
            input.condition_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )? {
            return Err(StoreError::ConditionalCheckFailed);
        }
        let updated = apply_update(
            &base,
            input.update_expression.as_deref().unwrap_or_default(),
            input.expression_attribute_names.as_ref().unwrap_or(&Names::new()),
            input.expression_attribute_values.as_ref().unwrap_or(&Values::new()),
        )?;
        table.put(updated.clone());
        let attributes = (input.return_values == Some(ReturnValue::AllNew)).then_some(updated);
        Ok(UpdateItemOutput::builder().set_attributes(attributes).build())
    }

    async fn delete_item(&self, input: DeleteItemInput) -> StoreResult<DeleteItemOutput> {
        let table_name = input.table_name.clone().unwrap_or_default();
        self.enter(Call {
            operation: "DeleteItem",
            table: table_name.clone(),
            condition: input.condition_expression.clone(),
            ..Default::default()
        })
        .await;
        let mut state = self.state.lock();
        let table = table(&mut state, &table_name)?;
        let key = input.key.unwrap_or_default();
        let current = table.get(&key).cloned().unwrap_or_default();
        if !matches(
            &current,
            input.condition_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )? {
            return Err(StoreError::ConditionalCheckFailed);
        }
        table.delete(&key);
        Ok(DeleteItemOutput::builder().build())
    }

    async fn query(&self, input: QueryInput) -> StoreResult<QueryOutput> {
        let table_name = input.table_name.clone().unwrap_or_default();
        self.enter(Call {
            operation: "Query",
            table: table_name.clone(),
            index: input.index_name.clone(),
            key_condition: input.key_condition_expression.clone(),
            filter: input.filter_expression.clone(),
            projection: input.projection_expression.clone(),
            consistent_read: input.consistent_read,
            limit: input.limit,
            ..Default::default()
        })
        .await;
        if input.key_condition_expression.is_none() {
            return Err(invalid("query without key condition"));
        }
        let mut state = self.state.lock();
        let result = read(
            &mut state,
            ReadRequest {
                table: &table_name,
                index: input.index_name.as_deref(),
                key_condition: input.key_condition_expression.as_deref(),
                filter: input.filter_expression.as_deref(),
                projection: input.projection_expression.as_deref(),
                names: &input.expression_attribute_names,
                values: &input.expression_attribute_values,
                exclusive_start_key: input.exclusive_start_key.as_ref(),
                limit: input.limit,
                select: input.select.as_ref(),
                forward: input.scan_index_forward.unwrap_or(true),
                segment: None,
            },
        )?;
        Ok(QueryOutput::builder()
            .set_items(Some(result.items))
            .count(result.count)
            .set_last_evaluated_key(result.last_evaluated_key)
            .build())
    }

    async fn scan(&self, input: ScanInput) -> StoreResult<ScanOutput> {
        let table_name = input.table_name.clone().unwrap_or_default();
        self.enter(Call {
            operation: "Scan",
            table: table_name.clone(),
            index: input.index_name.clone(),
            filter: input.filter_expression.clone(),
            projection: input.projection_expression.clone(),
            consistent_read: input.consistent_read,
            limit: input.limit,
            segment: input.segment,
            ..Default::default()
        })
        .await;
        let mut state = self.state.lock();
        if input.segment.is_some() && input.segment == state.faults.failing_segment {
            return Err(invalid("segment unavailable"));
        }
        let segment = input.segment.zip(input.total_segments);
        let result = read(
            &mut state,
            ReadRequest {
                table: &table_name,
                index: input.index_name.as_deref(),
                key_condition: None,
                filter: input.filter_expression.as_deref(),
                projection: input.projection_expression.as_deref(),
                names: &input.expression_attribute_names,
                values: &input.expression_attribute_values,
                exclusive_start_key: input.exclusive_start_key.as_ref(),
                limit: input.limit,
                select: input.select.as_ref(),
                forward: true,
                segment,
            },
        )?;
        Ok(ScanOutput::builder()
            .set_items(Some(result.items))
            .count(result.count)
            .set_last_evaluated_key(result.last_evaluated_key)
            .build())
    }

    async fn batch_get_item(&self, input: BatchGetItemInput) -> StoreResult<BatchGetItemOutput> {
        let request_items = input.request_items.unwrap_or_default();
        self.enter(Call {
            operation: "BatchGetItem",
            table: request_items.keys().cloned().collect::<Vec<_>>().join(","),
            requests: request_items.values().map(|request| request.keys.len()).sum(),
            ..Default::default()
        })
        .await;
        let mut state = self.state.lock();
        let partial = state.faults.unprocessed_get_rounds > 0;
        if partial {
            state.faults.unprocessed_get_rounds -= 1;
        }
        let mut responses = HashMap::new();
        let mut unprocessed = HashMap::new();
        for (table_name, request) in request_items {
            let table = table(&mut state, &table_name)?;
            let mut keys = request.keys.into_iter();
            let answered: Vec<_> = if partial {
                keys.by_ref().take(1).collect()
            } else {
                keys.by_ref().collect()
            };
            let found: Vec<_> = answered
                .iter()
                .filter_map(|key| table.get(key).cloned())
                .collect();
            responses.insert(table_name.clone(), found);
            let rest: Vec<_> = keys.collect();
            if !rest.is_empty() {
                let keys_and_attributes = KeysAndAttributes::builder()
                    .set_keys(Some(rest))
                    .build()
                    .map_err(|err| invalid(err.to_string()))?;
                unprocessed.insert(table_name, keys_and_attributes);
            }
        }
        Ok(BatchGetItemOutput::builder()
            .set_responses(Some(responses))
            .set_unprocessed_keys(Some(unprocessed))
            .build())
    }

    async fn batch_write_item(&self, input: BatchWriteItemInput) -> StoreResult<BatchWriteItemOutput> {
        let request_items = input.request_items.unwrap_or_default();
        self.enter(Call {
            operation: "BatchWriteItem",
            table: request_items.keys().cloned().collect::<Vec<_>>().join(","),
            requests: request_items.values().map(Vec::len).sum(),
            ..Default::default()
        })
        .await;
        let mut state = self.state.lock();
        let partial = state.faults.unprocessed_write_rounds > 0;
        if partial {
            state.faults.unprocessed_write_rounds -= 1;
        }
        let mut unprocessed: HashMap<String, Vec<WriteRequest>> = HashMap::new();
        for (table_name, requests) in request_items {
            if requests.len() > 25 {
                return Err(invalid("too many write requests"));
            }
            let table = table(&mut state, &table_name)?;
            let mut requests = requests.into_iter();
            let applied: Vec<_> = if partial {
                requests.by_ref().take(1).collect()
            } else {
                requests.by_ref().collect()
            };
            for request in applied {
                if let Some(put) = request.put_request {
                    table.check_key(&put.item)?;
                    table.put(put.item);
                } else if let Some(delete) = request.delete_request {
                    table.delete(&delete.key);
                }
            }
            let rest: Vec<_> = requests.collect();
            if !rest.is_empty() {
                unprocessed.insert(table_name, rest);
            }
        }
        Ok(BatchWriteItemOutput::builder()
            .set_unprocessed_items(Some(unprocessed))
            .build())
    }

    async fn transact_get_items(&self, input: TransactGetItemsInput) -> StoreResult<TransactGetItemsOutput> {
        let items = input.transact_items.unwrap_or_default();
        self.enter(Call {
            operation: "TransactGetItems",
            requests: items.len(),
            ..Default::default()
        })
        .await;
        let mut state = self.state.lock();
        let mut responses = Vec::with_capacity(items.len());
        for item in items {
            let Some(get) = item.get else {
                return Err(invalid("transaction get without target"));
            };
            let table = table(&mut state, &get.table_name)?;
            let found = table.get(&get.key).cloned();
            responses.push(ItemResponse::builder().set_item(found).build());
        }
        Ok(TransactGetItemsOutput::builder()
            .set_responses(Some(responses))
            .build())
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> StoreResult<TransactWriteItemsOutput> {
        let items = input.transact_items.unwrap_or_default();
        self.enter(Call {
            operation: "TransactWriteItems",
            requests: items.len(),
            ..Default::default()
        })
        .await;
        if items.len() > 100 {
            return Err(invalid("too many transaction items"));
        }
        let mut state = self.state.lock();
        let mut failures = Vec::with_capacity(items.len());
        for item in &items {
            let (table_name, key, condition, names, values) = if let Some(put) = &item.put {
                (
                    &put.table_name,
                    &put.item,
                    put.condition_expression.clone(),
                    &put.expression_attribute_names,
                    &put.expression_attribute_values,
                )
            } else if let Some(update) = &item.update {
                (
                    &update.table_name,
                    &update.key,
                    update.condition_expression.clone(),
                    &update.expression_attribute_names,
                    &update.expression_attribute_values,
                )
            } else if let Some(delete) = &item.delete {
                (
                    &delete.table_name,
                    &delete.key,
                    delete.condition_expression.clone(),
                    &delete.expression_attribute_names,
                    &delete.expression_attribute_values,
                )
            } else if let Some(check) = &item.condition_check {
                (
                    &check.table_name,
                    &check.key,
                    Some(check.condition_expression.clone()),
                    &check.expression_attribute_names,
                    &check.expression_attribute_values,
                )
            } else {
                return Err(invalid("transaction item without operation"));
            };
            let table = table(&mut state, table_name)?;
            let current = table.get(key).cloned().unwrap_or_default();
            failures.push(!matches(&current, condition.as_deref(), names, values)?);
        }
        if failures.iter().any(|failed| *failed) {
            return Err(canceled(failures));
        }
        for item in items {
            if let Some(put) = item.put {
                table(&mut state, &put.table_name)?.put(put.item);
            } else if let Some(update) = item.update {
                let table = table(&mut state, &update.table_name)?;
                let base = table.get(&update.key).cloned().unwrap_or_else(|| update.key.clone());
                let updated = apply_update(
                    &base,
                    &update.update_expression,
                    update.expression_attribute_names.as_ref().unwrap_or(&Names::new()),
                    update.expression_attribute_values.as_ref().unwrap_or(&Values::new()),
                )?;
                table.put(updated);
            } else if let Some(delete) = item.delete {
                table(&mut state, &delete.table_name)?.delete(&delete.key);
            }
        }
        Ok(TransactWriteItemsOutput::builder().build())
    }
}
