use crate::front::ast::ParamKind;
use crate::front::types::Type;

/// 运行时库函数的 SL 级签名。
/// 这些符号位于第 0 层作用域，因此永远不会被捕获；
/// 语义检查与 IR 声明共用这一张表。
pub struct RuntimeFunc {
    pub name: &'static str,
    pub params: Vec<(ParamKind, Type)>,
    pub ret_ty: Type,
}

fn byte_array() -> Type {
    Type::array(Type::Byte, None)
}

pub fn runtime_functions() -> Vec<RuntimeFunc> {
    let value = ParamKind::Value;
    vec![
        RuntimeFunc {
            name: "writeInteger",
            params: vec![(value, Type::Int)],
            ret_ty: Type::Void,
        },
        RuntimeFunc {
            name: "writeByte",
            params: vec![(value, Type::Byte)],
            ret_ty: Type::Void,
        },
        RuntimeFunc {
            name: "writeChar",
            params: vec![(value, Type::Byte)],
            ret_ty: Type::Void,
        },
        RuntimeFunc {
            name: "writeString",
            params: vec![(value, byte_array())],
            ret_ty: Type::Void,
        },
        RuntimeFunc {
            name: "readInteger",
            params: vec![],
            ret_ty: Type::Int,
        },
        RuntimeFunc {
            name: "readByte",
            params: vec![],
            ret_ty: Type::Byte,
        },
        RuntimeFunc {
            name: "readChar",
            params: vec![],
            ret_ty: Type::Byte,
        },
        RuntimeFunc {
            name: "readString",
            params: vec![(value, Type::Int), (value, byte_array())],
            ret_ty: Type::Void,
        },
        RuntimeFunc {
            name: "extend",
            params: vec![(value, Type::Byte)],
            ret_ty: Type::Int,
        },
        RuntimeFunc {
            name: "shrink",
            params: vec![(value, Type::Int)],
            ret_ty: Type::Byte,
        },
        RuntimeFunc {
            name: "strlen",
            params: vec![(value, byte_array())],
            ret_ty: Type::Int,
        },
        RuntimeFunc {
            name: "strcmp",
            params: vec![(value, byte_array()), (value, byte_array())],
            ret_ty: Type::Int,
        },
        RuntimeFunc {
            name: "strcpy",
            params: vec![(value, byte_array()), (value, byte_array())],
            ret_ty: Type::Void,
        },
        RuntimeFunc {
            name: "strcat",
            params: vec![(value, byte_array()), (value, byte_array())],
            ret_ty: Type::Void,
        },
    ]
}
