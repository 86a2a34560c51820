/// Well-known property and child names the wire protocol and schema
/// bootstrap hard-code, mirroring `impl.py`/`connection.py`'s use of
/// literal strings for the same purpose. Centralizing them here means a
/// complete client needs exactly one place to change if a deployment
/// renames its namespace prefixes.
pub const PRIMARY_TYPE: &str = "jcr:primaryType";
pub const IS_CHECKED_OUT: &str = "jcr:isCheckedOut";
pub const CHILDREN_NAME: &str = "ecm:children";
pub const SECURITY_PROPERTY: &str = "ecm:security";
pub const LOCAL_ROLES_PROPERTY: &str = "ecm:localroles";
