//! PostgreSQL type OID constants this proxy understands.
//!
//! Reference: <https://github.com/postgres/postgres/blob/master/src/include/catalog/pg_type.dat>
//!
//! This is deliberately the minimum set §4.4 names, not the full catalog —
//! an OID this proxy never needs to round-trip (arrays, ranges, composite
//! types, …) isn't worth a variant in [`crate::value::PgValue`].

pub const BOOL: u32 = 16;
pub const BYTEA: u32 = 17;
pub const INT8: u32 = 20;
pub const INT2: u32 = 21;
pub const INT4: u32 = 23;
pub const TEXT: u32 = 25;
pub const FLOAT4: u32 = 700;
pub const FLOAT8: u32 = 701;
pub const UNKNOWN: u32 = 705;
pub const VARCHAR: u32 = 1043;
pub const DATE: u32 = 1082;
pub const TIMESTAMP: u32 = 1114;
pub const NUMERIC: u32 = 1700;
pub const TIMESTAMPTZ: u32 = 1184;

/// Human-readable name for an OID, used in error messages and logs.
pub fn name(oid: u32) -> &'static str {
    match oid {
        BOOL => "bool",
        BYTEA => "bytea",
        INT8 => "int8",
        INT2 => "int2",
        INT4 => "int4",
        TEXT => "text",
        FLOAT4 => "float4",
        FLOAT8 => "float8",
        UNKNOWN => "unknown",
        VARCHAR => "varchar",
        DATE => "date",
        TIMESTAMP => "timestamp",
        TIMESTAMPTZ => "timestamptz",
        NUMERIC => "numeric",
        _ => "unrecognized",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_covers_known_oids() {
        assert_eq!(name(INT8), "int8");
        assert_eq!(name(NUMERIC), "numeric");
        assert_eq!(name(999999), "unrecognized");
    }
}
