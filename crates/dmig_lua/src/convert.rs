use dmig_core::{Record, Value};
use mlua::{Lua, Table, Value as LuaValue};

/// Lower a pipeline value into the Lua world.
pub fn value_to_lua(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    Ok(match value {
        Value::Null => LuaValue::Nil,
        Value::Bool(b) => LuaValue::Boolean(*b),
        Value::Int(i) => LuaValue::Integer(*i),
        Value::Float(f) => LuaValue::Number(*f),
        Value::Text(s) => LuaValue::String(lua.create_string(s)?),
        Value::Bytes(b) => LuaValue::String(lua.create_string(b)?),
        Value::DateTime(dt) => LuaValue::String(lua.create_string(dt.to_rfc3339())?),
        Value::List(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.set(i + 1, value_to_lua(lua, item)?)?;
            }
            LuaValue::Table(table)
        }
        Value::Map(entries) => {
            let table = lua.create_table()?;
            for (k, v) in entries {
                table.set(k.as_str(), value_to_lua(lua, v)?)?;
            }
            LuaValue::Table(table)
        }
    })
}

/// Lift a Lua value back into the pipeline. Tables with sequence entries
/// become lists, everything else keyed becomes a map.
pub fn lua_to_value(value: &LuaValue) -> Value {
    match value {
        LuaValue::Nil => Value::Null,
        LuaValue::Boolean(b) => Value::Bool(*b),
        LuaValue::Integer(i) => Value::Int(*i),
        LuaValue::Number(n) => Value::Float(*n),
        LuaValue::String(s) => Value::Text(s.to_string_lossy().to_string()),
        LuaValue::Table(table) => {
            if table.raw_len() > 0 {
                let mut items = Vec::new();
                for item in table.clone().sequence_values::<LuaValue>() {
                    match item {
                        Ok(item) => items.push(lua_to_value(&item)),
                        Err(_) => break,
                    }
                }
                Value::List(items)
            } else {
                let mut entries = std::collections::BTreeMap::new();
                for pair in table.clone().pairs::<String, LuaValue>() {
                    if let Ok((k, v)) = pair {
                        entries.insert(k, lua_to_value(&v));
                    }
                }
                Value::Map(entries)
            }
        }
        other => Value::Text(format!("{:?}", other)),
    }
}

pub fn record_to_table(lua: &Lua, record: &Record) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    for (column, value) in record.iter() {
        table.set(column, value_to_lua(lua, value)?)?;
    }
    Ok(table)
}

pub fn table_to_record(table: &Table) -> Record {
    table
        .clone()
        .pairs::<String, LuaValue>()
        .flatten()
        .map(|(column, value)| (column, lua_to_value(&value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_round_trip() {
        let lua = Lua::new();

        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Int(42),
            Value::Float(2.5),
            Value::Text("hello".into()),
        ] {
            let lowered = value_to_lua(&lua, &value).unwrap();
            assert_eq!(lua_to_value(&lowered), value, "{value:?}");
        }
    }

    #[test]
    fn records_round_trip_through_tables() {
        let lua = Lua::new();
        let mut record = Record::new();
        record.set("id", "1");
        record.set("count", 3i64);

        let table = record_to_table(&lua, &record).unwrap();
        assert_eq!(table_to_record(&table), record);
    }

    #[test]
    fn sequence_tables_become_lists() {
        let lua = Lua::new();
        let table = lua.create_table().unwrap();
        table.set(1, "a").unwrap();
        table.set(2, "b").unwrap();

        let value = lua_to_value(&LuaValue::Table(table));
        assert_eq!(
            value,
            Value::List(vec![Value::Text("a".into()), Value::Text("b".into())])
        );
    }
}
